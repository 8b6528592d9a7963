//! Repository implementations for SQLite
//!
//! Each function runs exactly one statement and takes any `SqliteExecutor`,
//! so it works on the pool or on `&mut *tx` alike.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use milkbank_core::{
    Appointment, AppointmentCommand, AppointmentType, DonationVisit, DonorRecord, Gift,
    LedgerEntry, LedgerReason, Slot,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor, SqlitePool};

use crate::error::{PersistenceError, PersistenceResult};
use crate::sqlite::schema::*;

// ============================================================================
// Pool
// ============================================================================

/// Open a pool. In-memory databases get a single long-lived connection so
/// every caller sees the same database.
pub async fn create_pool(database_url: &str) -> PersistenceResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options.journal_mode(SqliteJournalMode::Wal))
            .await?
    };
    Ok(pool)
}

/// Create tables, indexes and triggers if missing
pub async fn apply_schema(pool: &SqlitePool) -> PersistenceResult<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

/// Open a pool and make sure the schema exists
pub async fn init_database(database_url: &str) -> PersistenceResult<SqlitePool> {
    let pool = create_pool(database_url).await?;
    apply_schema(&pool).await?;
    tracing::debug!(url = %database_url, "Database schema ready");
    Ok(pool)
}

// ============================================================================
// Donor Repository
// ============================================================================

/// Repository for the `donors` table
pub struct DonorRepo;

impl DonorRepo {
    pub async fn insert<'e, E: SqliteExecutor<'e>>(
        exec: E,
        donor: &DonorRecord,
    ) -> PersistenceResult<()> {
        sqlx::query(
            r#"INSERT INTO donors (
                id, full_name, phone, email, date_of_birth, status, screening_outcome,
                rejection_reasons, test_references, approval_signature, suspension_reason,
                removal_reason, points_balance, version, created_at, updated_at, archived_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&donor.id)
        .bind(&donor.full_name)
        .bind(&donor.phone)
        .bind(&donor.email)
        .bind(donor.date_of_birth)
        .bind(donor.status.to_string())
        .bind(donor.screening_outcome.map(|o| o.to_string()))
        .bind(serde_json::to_string(&donor.rejection_reasons)?)
        .bind(serde_json::to_string(&donor.test_references)?)
        .bind(&donor.approval_signature)
        .bind(&donor.suspension_reason)
        .bind(&donor.removal_reason)
        .bind(donor.points_balance)
        .bind(donor.version)
        .bind(donor.created_at)
        .bind(donor.updated_at)
        .bind(donor.archived_at)
        .execute(exec)
        .await
        .map_err(|e| match PersistenceError::from_sqlx(e) {
            PersistenceError::UniqueViolation(_) => {
                PersistenceError::already_exists("Donor", &donor.id)
            }
            other => other,
        })?;
        Ok(())
    }

    pub async fn get<'e, E: SqliteExecutor<'e>>(
        exec: E,
        id: &str,
    ) -> PersistenceResult<Option<DonorRecord>> {
        sqlx::query_as::<_, DonorRow>("SELECT * FROM donors WHERE id = ?")
            .bind(id)
            .fetch_optional(exec)
            .await?
            .map(DonorRecord::try_from)
            .transpose()
    }

    /// Write lifecycle fields if the stored version still equals
    /// `expected_version`. Never touches `points_balance`.
    ///
    /// Returns false when the row moved on (or vanished).
    pub async fn update_versioned<'e, E: SqliteExecutor<'e>>(
        exec: E,
        donor: &DonorRecord,
        expected_version: i64,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            r#"UPDATE donors SET
                full_name = ?, phone = ?, email = ?, date_of_birth = ?, status = ?,
                screening_outcome = ?, rejection_reasons = ?, test_references = ?,
                approval_signature = ?, suspension_reason = ?, removal_reason = ?,
                version = version + 1, updated_at = ?, archived_at = ?
            WHERE id = ? AND version = ?"#,
        )
        .bind(&donor.full_name)
        .bind(&donor.phone)
        .bind(&donor.email)
        .bind(donor.date_of_birth)
        .bind(donor.status.to_string())
        .bind(donor.screening_outcome.map(|o| o.to_string()))
        .bind(serde_json::to_string(&donor.rejection_reasons)?)
        .bind(serde_json::to_string(&donor.test_references)?)
        .bind(&donor.approval_signature)
        .bind(&donor.suspension_reason)
        .bind(&donor.removal_reason)
        .bind(donor.updated_at)
        .bind(donor.archived_at)
        .bind(&donor.id)
        .bind(expected_version)
        .execute(exec)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn list<'e, E: SqliteExecutor<'e>>(
        exec: E,
        filter: &DonorFilter,
    ) -> PersistenceResult<Vec<DonorRecord>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM donors WHERE 1 = 1");
        push_donor_filter(&mut qb, filter);
        qb.push(format!(
            " ORDER BY {} {}, id ASC",
            filter.sort_by.column(),
            filter.order.keyword()
        ));
        qb.push(" LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        qb.build_query_as::<DonorRow>()
            .fetch_all(exec)
            .await?
            .into_iter()
            .map(DonorRecord::try_from)
            .collect()
    }

    pub async fn count<'e, E: SqliteExecutor<'e>>(
        exec: E,
        filter: &DonorFilter,
    ) -> PersistenceResult<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM donors WHERE 1 = 1");
        push_donor_filter(&mut qb, filter);
        Ok(qb.build_query_scalar::<i64>().fetch_one(exec).await?)
    }

    /// Pre-approval donors not updated since `cutoff`
    pub async fn find_inactive<'e, E: SqliteExecutor<'e>>(
        exec: E,
        cutoff: DateTime<Utc>,
    ) -> PersistenceResult<Vec<DonorRecord>> {
        sqlx::query_as::<_, DonorRow>(
            r#"SELECT * FROM donors
            WHERE status IN ('pending', 'interviewed', 'needs_tests') AND updated_at < ?
            ORDER BY updated_at ASC"#,
        )
        .bind(cutoff)
        .fetch_all(exec)
        .await?
        .into_iter()
        .map(DonorRecord::try_from)
        .collect()
    }
}

fn push_donor_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &DonorFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.to_string());
    }
    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", q);
        qb.push(" AND (full_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR email LIKE ")
            .push_bind(pattern.clone())
            .push(" OR phone LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

// ============================================================================
// Donor Event Repository
// ============================================================================

/// Repository for the `donor_events` log
pub struct DonorEventRepo;

impl DonorEventRepo {
    pub async fn append<'e, E: SqliteExecutor<'e>>(
        exec: E,
        entry: &NewDonorHistoryEntry,
    ) -> PersistenceResult<()> {
        sqlx::query(
            r#"INSERT INTO donor_events
                (donor_id, from_status, to_status, event, payload, actor_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&entry.donor_id)
        .bind(entry.from_status.to_string())
        .bind(entry.to_status.to_string())
        .bind(&entry.event)
        .bind(entry.payload.to_string())
        .bind(&entry.actor_id)
        .bind(entry.created_at)
        .execute(exec)
        .await
        .map_err(PersistenceError::from_sqlx)?;
        Ok(())
    }

    pub async fn list<'e, E: SqliteExecutor<'e>>(
        exec: E,
        donor_id: &str,
    ) -> PersistenceResult<Vec<DonorHistoryEntry>> {
        sqlx::query_as::<_, DonorEventRow>(
            "SELECT * FROM donor_events WHERE donor_id = ? ORDER BY id ASC",
        )
        .bind(donor_id)
        .fetch_all(exec)
        .await?
        .into_iter()
        .map(DonorHistoryEntry::try_from)
        .collect()
    }
}

// ============================================================================
// Resource Repository
// ============================================================================

/// Repository for bookable `resources`
pub struct ResourceRepo;

impl ResourceRepo {
    pub async fn insert<'e, E: SqliteExecutor<'e>>(
        exec: E,
        resource: &ResourceRecord,
    ) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO resources (id, name, appointment_type, active, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&resource.id)
        .bind(&resource.name)
        .bind(resource.appointment_type.to_string())
        .bind(resource.active)
        .bind(resource.created_at)
        .execute(exec)
        .await
        .map_err(|e| match PersistenceError::from_sqlx(e) {
            PersistenceError::UniqueViolation(_) => {
                PersistenceError::already_exists("Resource", &resource.id)
            }
            other => other,
        })?;
        Ok(())
    }

    pub async fn get<'e, E: SqliteExecutor<'e>>(
        exec: E,
        id: &str,
    ) -> PersistenceResult<Option<ResourceRecord>> {
        sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE id = ?")
            .bind(id)
            .fetch_optional(exec)
            .await?
            .map(ResourceRecord::try_from)
            .transpose()
    }

    pub async fn list<'e, E: SqliteExecutor<'e>>(
        exec: E,
        appointment_type: Option<AppointmentType>,
        active_only: bool,
    ) -> PersistenceResult<Vec<ResourceRecord>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM resources WHERE 1 = 1");
        if let Some(t) = appointment_type {
            qb.push(" AND appointment_type = ").push_bind(t.to_string());
        }
        if active_only {
            qb.push(" AND active = 1");
        }
        qb.push(" ORDER BY id ASC");

        qb.build_query_as::<ResourceRow>()
            .fetch_all(exec)
            .await?
            .into_iter()
            .map(ResourceRecord::try_from)
            .collect()
    }

    pub async fn deactivate<'e, E: SqliteExecutor<'e>>(
        exec: E,
        id: &str,
    ) -> PersistenceResult<()> {
        let result = sqlx::query("UPDATE resources SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(exec)
            .await?;
        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("Resource", id));
        }
        Ok(())
    }
}

// ============================================================================
// Appointment Repository
// ============================================================================

/// Repository for `appointments`
pub struct AppointmentRepo;

impl AppointmentRepo {
    /// Single-statement booking. The partial unique indexes decide the
    /// outcome: `SlotTaken` or `DonorHasOpenAppointment` on conflict.
    pub async fn insert<'e, E: SqliteExecutor<'e>>(
        exec: E,
        appointment: &Appointment,
    ) -> PersistenceResult<()> {
        sqlx::query(
            r#"INSERT INTO appointments (
                id, donor_id, appointment_type, resource_id, slot_date, slot_time, status,
                failure_reason, failure_notes, cancelled_by, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&appointment.id)
        .bind(&appointment.donor_id)
        .bind(appointment.appointment_type.to_string())
        .bind(&appointment.resource_id)
        .bind(format_date(appointment.slot_date))
        .bind(format_time(appointment.slot_time))
        .bind(appointment.status.to_string())
        .bind(appointment.failure_reason.map(|r| r.to_string()))
        .bind(&appointment.failure_notes)
        .bind(&appointment.cancelled_by)
        .bind(appointment.created_at)
        .bind(appointment.updated_at)
        .execute(exec)
        .await
        .map_err(PersistenceError::from_booking)?;
        Ok(())
    }

    pub async fn get<'e, E: SqliteExecutor<'e>>(
        exec: E,
        id: &str,
    ) -> PersistenceResult<Option<Appointment>> {
        sqlx::query_as::<_, AppointmentRow>("SELECT * FROM appointments WHERE id = ?")
            .bind(id)
            .fetch_optional(exec)
            .await?
            .map(Appointment::try_from)
            .transpose()
    }

    /// Conditional status update guarded by `command.allowed_from()`.
    ///
    /// Returns false when the appointment was not in an allowed status.
    pub async fn apply_command<'e, E: SqliteExecutor<'e>>(
        exec: E,
        id: &str,
        command: &AppointmentCommand,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> PersistenceResult<bool> {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE appointments SET status = ");
        qb.push_bind(command.target().to_string());
        match command {
            AppointmentCommand::Fail { reason, notes } => {
                qb.push(", failure_reason = ")
                    .push_bind(reason.to_string())
                    .push(", failure_notes = ")
                    .push_bind(notes.clone());
            }
            AppointmentCommand::Cancel => {
                qb.push(", cancelled_by = ").push_bind(actor_id.to_string());
            }
            AppointmentCommand::CheckIn | AppointmentCommand::Complete => {}
        }
        qb.push(", updated_at = ")
            .push_bind(now)
            .push(" WHERE id = ")
            .push_bind(id.to_string())
            .push(" AND status IN (");
        let mut allowed = qb.separated(", ");
        for status in command.allowed_from() {
            allowed.push_bind(status.to_string());
        }
        qb.push(")");

        let result = qb.build().execute(exec).await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list<'e, E: SqliteExecutor<'e>>(
        exec: E,
        filter: &AppointmentFilter,
    ) -> PersistenceResult<Vec<Appointment>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM appointments WHERE 1 = 1");
        push_appointment_filter(&mut qb, filter);
        qb.push(" ORDER BY slot_date ASC, slot_time ASC, resource_id ASC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        qb.build_query_as::<AppointmentRow>()
            .fetch_all(exec)
            .await?
            .into_iter()
            .map(Appointment::try_from)
            .collect()
    }

    pub async fn count<'e, E: SqliteExecutor<'e>>(
        exec: E,
        filter: &AppointmentFilter,
    ) -> PersistenceResult<i64> {
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM appointments WHERE 1 = 1");
        push_appointment_filter(&mut qb, filter);
        Ok(qb.build_query_scalar::<i64>().fetch_one(exec).await?)
    }

    /// Slots held by non-terminal appointments in `[from, to]`
    pub async fn held_slots<'e, E: SqliteExecutor<'e>>(
        exec: E,
        from: NaiveDate,
        to: NaiveDate,
    ) -> PersistenceResult<Vec<Slot>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"SELECT resource_id, slot_date, slot_time FROM appointments
            WHERE status IN ('scheduled', 'arrived') AND slot_date >= ? AND slot_date <= ?"#,
        )
        .bind(format_date(from))
        .bind(format_date(to))
        .fetch_all(exec)
        .await?;

        rows.into_iter()
            .map(|(resource_id, date, time)| {
                Ok(Slot::new(resource_id, parse_date(&date)?, parse_time(&time)?))
            })
            .collect()
    }
}

fn push_appointment_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &AppointmentFilter) {
    if let Some(date) = filter.date {
        qb.push(" AND slot_date = ").push_bind(format_date(date));
    }
    if let Some(resource_id) = &filter.resource_id {
        qb.push(" AND resource_id = ").push_bind(resource_id.clone());
    }
    if let Some(donor_id) = &filter.donor_id {
        qb.push(" AND donor_id = ").push_bind(donor_id.clone());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.to_string());
    }
    if let Some(t) = filter.appointment_type {
        qb.push(" AND appointment_type = ").push_bind(t.to_string());
    }
}

// ============================================================================
// Visit Repository
// ============================================================================

/// Repository for `donation_visits`
pub struct VisitRepo;

impl VisitRepo {
    pub async fn insert<'e, E: SqliteExecutor<'e>>(
        exec: E,
        visit: &DonationVisit,
    ) -> PersistenceResult<()> {
        sqlx::query(
            r#"INSERT INTO donation_visits (
                id, appointment_id, donor_id, health_status, volume_ml, container_count,
                points_awarded, notes, recorded_by, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&visit.id)
        .bind(&visit.appointment_id)
        .bind(&visit.donor_id)
        .bind(visit.health_status.to_string())
        .bind(visit.volume_ml)
        .bind(visit.container_count)
        .bind(visit.points_awarded)
        .bind(&visit.notes)
        .bind(&visit.recorded_by)
        .bind(visit.recorded_at)
        .execute(exec)
        .await
        .map_err(|e| match PersistenceError::from_sqlx(e) {
            PersistenceError::UniqueViolation(_) => {
                PersistenceError::already_exists("DonationVisit", &visit.appointment_id)
            }
            other => other,
        })?;
        Ok(())
    }

    pub async fn get_by_appointment<'e, E: SqliteExecutor<'e>>(
        exec: E,
        appointment_id: &str,
    ) -> PersistenceResult<Option<DonationVisit>> {
        sqlx::query_as::<_, VisitRow>("SELECT * FROM donation_visits WHERE appointment_id = ?")
            .bind(appointment_id)
            .fetch_optional(exec)
            .await?
            .map(DonationVisit::try_from)
            .transpose()
    }

    pub async fn list_for_donor<'e, E: SqliteExecutor<'e>>(
        exec: E,
        donor_id: &str,
    ) -> PersistenceResult<Vec<DonationVisit>> {
        sqlx::query_as::<_, VisitRow>(
            "SELECT * FROM donation_visits WHERE donor_id = ? ORDER BY recorded_at ASC",
        )
        .bind(donor_id)
        .fetch_all(exec)
        .await?
        .into_iter()
        .map(DonationVisit::try_from)
        .collect()
    }
}

// ============================================================================
// Ledger Repository
// ============================================================================

/// Repository for the append-only `ledger_entries` table and the cached
/// `donors.points_balance` column
pub struct LedgerRepo;

impl LedgerRepo {
    /// Append the donor's next entry; the sequence is assigned in the same
    /// statement
    pub async fn append<'e, E: SqliteExecutor<'e>>(
        exec: E,
        donor_id: &str,
        delta: i64,
        reason: LedgerReason,
        reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> PersistenceResult<LedgerEntry> {
        let row = sqlx::query_as::<_, LedgerRow>(
            r#"INSERT INTO ledger_entries (donor_id, sequence, delta, reason, reference, created_at)
            SELECT ?1, COALESCE(MAX(sequence), 0) + 1, ?2, ?3, ?4, ?5
            FROM ledger_entries WHERE donor_id = ?1
            RETURNING *"#,
        )
        .bind(donor_id)
        .bind(delta)
        .bind(reason.to_string())
        .bind(reference)
        .bind(now)
        .fetch_one(exec)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        LedgerEntry::try_from(row)
    }

    /// Add `delta` to the cached balance; returns the new balance, or None
    /// when the donor does not exist. A negative result violates the CHECK.
    pub async fn adjust_balance<'e, E: SqliteExecutor<'e>>(
        exec: E,
        donor_id: &str,
        delta: i64,
    ) -> PersistenceResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>(
            "UPDATE donors SET points_balance = points_balance + ? WHERE id = ? RETURNING points_balance",
        )
        .bind(delta)
        .bind(donor_id)
        .fetch_optional(exec)
        .await
        .map_err(PersistenceError::from_sqlx)
    }

    pub async fn cached_balance<'e, E: SqliteExecutor<'e>>(
        exec: E,
        donor_id: &str,
    ) -> PersistenceResult<Option<i64>> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT points_balance FROM donors WHERE id = ?")
                .bind(donor_id)
                .fetch_optional(exec)
                .await?,
        )
    }

    pub async fn sum<'e, E: SqliteExecutor<'e>>(exec: E, donor_id: &str) -> PersistenceResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(delta), 0) FROM ledger_entries WHERE donor_id = ?",
        )
        .bind(donor_id)
        .fetch_one(exec)
        .await?)
    }

    pub async fn entries<'e, E: SqliteExecutor<'e>>(
        exec: E,
        donor_id: &str,
    ) -> PersistenceResult<Vec<LedgerEntry>> {
        sqlx::query_as::<_, LedgerRow>(
            "SELECT * FROM ledger_entries WHERE donor_id = ? ORDER BY sequence ASC",
        )
        .bind(donor_id)
        .fetch_all(exec)
        .await?
        .into_iter()
        .map(LedgerEntry::try_from)
        .collect()
    }
}

// ============================================================================
// Gift Repository
// ============================================================================

/// Repository for the `gifts` catalog
pub struct GiftRepo;

impl GiftRepo {
    pub async fn insert<'e, E: SqliteExecutor<'e>>(exec: E, gift: &Gift) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO gifts (id, name, point_cost, stock, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&gift.id)
        .bind(&gift.name)
        .bind(gift.point_cost)
        .bind(gift.stock)
        .bind(gift.created_at)
        .execute(exec)
        .await
        .map_err(PersistenceError::from_sqlx)?;
        Ok(())
    }

    pub async fn get<'e, E: SqliteExecutor<'e>>(
        exec: E,
        id: &str,
    ) -> PersistenceResult<Option<Gift>> {
        Ok(
            sqlx::query_as::<_, GiftRow>("SELECT * FROM gifts WHERE id = ?")
                .bind(id)
                .fetch_optional(exec)
                .await?
                .map(Gift::from),
        )
    }

    pub async fn list<'e, E: SqliteExecutor<'e>>(exec: E) -> PersistenceResult<Vec<Gift>> {
        Ok(
            sqlx::query_as::<_, GiftRow>("SELECT * FROM gifts ORDER BY point_cost ASC, name ASC")
                .fetch_all(exec)
                .await?
                .into_iter()
                .map(Gift::from)
                .collect(),
        )
    }

    /// Take one unit; false when out of stock
    pub async fn take_one<'e, E: SqliteExecutor<'e>>(exec: E, id: &str) -> PersistenceResult<bool> {
        let result = sqlx::query("UPDATE gifts SET stock = stock - 1 WHERE id = ? AND stock > 0")
            .bind(id)
            .execute(exec)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Add stock; returns the new level, or None for an unknown gift
    pub async fn restock<'e, E: SqliteExecutor<'e>>(
        exec: E,
        id: &str,
        quantity: i64,
    ) -> PersistenceResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>(
            "UPDATE gifts SET stock = stock + ? WHERE id = ? RETURNING stock",
        )
        .bind(quantity)
        .bind(id)
        .fetch_optional(exec)
        .await
        .map_err(PersistenceError::from_sqlx)
    }
}
