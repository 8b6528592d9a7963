//! Database schema definitions
//!
//! DDL for every table plus the row types sqlx maps them into. Enum columns
//! hold the snake_case string form; list columns hold JSON arrays. Slot dates
//! and times are stored as `YYYY-MM-DD` and `HH:MM` so the booking indexes
//! compare exact text.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use milkbank_core::{
    Appointment, AppointmentStatus, AppointmentType, DonationVisit, DonorRecord, DonorStatus,
    Gift, LedgerEntry,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{PersistenceError, PersistenceResult};

/// Full schema, idempotent
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS donors (
    id                  TEXT PRIMARY KEY,
    full_name           TEXT NOT NULL,
    phone               TEXT,
    email               TEXT,
    date_of_birth       TEXT,
    status              TEXT NOT NULL,
    screening_outcome   TEXT,
    rejection_reasons   TEXT NOT NULL DEFAULT '[]',
    test_references     TEXT NOT NULL DEFAULT '[]',
    approval_signature  TEXT,
    suspension_reason   TEXT,
    removal_reason      TEXT,
    points_balance      INTEGER NOT NULL DEFAULT 0 CHECK (points_balance >= 0),
    version             INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    archived_at         TEXT
);
CREATE INDEX IF NOT EXISTS idx_donors_status ON donors(status);

CREATE TABLE IF NOT EXISTS donor_events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    donor_id     TEXT NOT NULL REFERENCES donors(id),
    from_status  TEXT NOT NULL,
    to_status    TEXT NOT NULL,
    event        TEXT NOT NULL,
    payload      TEXT NOT NULL,
    actor_id     TEXT NOT NULL,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_donor_events_donor ON donor_events(donor_id);

CREATE TABLE IF NOT EXISTS resources (
    id                TEXT PRIMARY KEY,
    name              TEXT NOT NULL,
    appointment_type  TEXT NOT NULL,
    active            INTEGER NOT NULL DEFAULT 1,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS appointments (
    id                TEXT PRIMARY KEY,
    donor_id          TEXT NOT NULL REFERENCES donors(id),
    appointment_type  TEXT NOT NULL,
    resource_id       TEXT NOT NULL REFERENCES resources(id),
    slot_date         TEXT NOT NULL,
    slot_time         TEXT NOT NULL,
    status            TEXT NOT NULL,
    failure_reason    TEXT,
    failure_notes     TEXT,
    cancelled_by      TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS ux_appointments_open_slot
    ON appointments(resource_id, slot_date, slot_time)
    WHERE status IN ('scheduled', 'arrived');
CREATE UNIQUE INDEX IF NOT EXISTS ux_appointments_open_donor_type
    ON appointments(donor_id, appointment_type)
    WHERE status IN ('scheduled', 'arrived');
CREATE INDEX IF NOT EXISTS idx_appointments_date ON appointments(slot_date);

CREATE TABLE IF NOT EXISTS donation_visits (
    id               TEXT PRIMARY KEY,
    appointment_id   TEXT NOT NULL UNIQUE REFERENCES appointments(id),
    donor_id         TEXT NOT NULL REFERENCES donors(id),
    health_status    TEXT NOT NULL,
    volume_ml        INTEGER NOT NULL,
    container_count  INTEGER NOT NULL,
    points_awarded   INTEGER NOT NULL,
    notes            TEXT,
    recorded_by      TEXT NOT NULL,
    recorded_at      TEXT NOT NULL,
    CHECK ((health_status = 'good' AND volume_ml > 0)
        OR (health_status = 'bad' AND volume_ml = 0 AND container_count = 0))
);
CREATE INDEX IF NOT EXISTS idx_visits_donor ON donation_visits(donor_id);

CREATE TABLE IF NOT EXISTS ledger_entries (
    donor_id    TEXT NOT NULL REFERENCES donors(id),
    sequence    INTEGER NOT NULL,
    delta       INTEGER NOT NULL,
    reason      TEXT NOT NULL,
    reference   TEXT,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (donor_id, sequence)
);
CREATE TRIGGER IF NOT EXISTS ledger_entries_no_update
    BEFORE UPDATE ON ledger_entries
BEGIN
    SELECT RAISE(ABORT, 'ledger entries are append-only');
END;
CREATE TRIGGER IF NOT EXISTS ledger_entries_no_delete
    BEFORE DELETE ON ledger_entries
BEGIN
    SELECT RAISE(ABORT, 'ledger entries are append-only');
END;

CREATE TABLE IF NOT EXISTS gifts (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    point_cost  INTEGER NOT NULL CHECK (point_cost > 0),
    stock       INTEGER NOT NULL CHECK (stock >= 0),
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS approval_sessions (
    donor_id              TEXT PRIMARY KEY REFERENCES donors(id),
    state                 TEXT NOT NULL,
    provider_id           TEXT,
    document_hash         TEXT,
    transaction_id        TEXT,
    challenge_expires_at  TEXT,
    verify_lease_until    TEXT,
    attempts              INTEGER NOT NULL DEFAULT 0,
    artifact_ref          TEXT,
    failure_reason        TEXT,
    version               INTEGER NOT NULL DEFAULT 0,
    created_at            TEXT NOT NULL,
    updated_at            TEXT NOT NULL
);
"#;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIME_FORMAT: &str = "%H:%M";

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn format_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub(crate) fn parse_enum<T: FromStr>(field: &str, value: &str) -> PersistenceResult<T> {
    T::from_str(value).map_err(|_| PersistenceError::InvalidEnumValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

pub(crate) fn parse_date(value: &str) -> PersistenceResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| PersistenceError::InvalidValue {
        field: "slot_date".to_string(),
        value: value.to_string(),
    })
}

pub(crate) fn parse_time(value: &str) -> PersistenceResult<NaiveTime> {
    NaiveTime::parse_from_str(value, TIME_FORMAT).map_err(|_| PersistenceError::InvalidValue {
        field: "slot_time".to_string(),
        value: value.to_string(),
    })
}

/// Row type for `donors`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DonorRow {
    pub id: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub status: String,
    pub screening_outcome: Option<String>,
    pub rejection_reasons: String,
    pub test_references: String,
    pub approval_signature: Option<String>,
    pub suspension_reason: Option<String>,
    pub removal_reason: Option<String>,
    pub points_balance: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl TryFrom<DonorRow> for DonorRecord {
    type Error = PersistenceError;

    fn try_from(row: DonorRow) -> PersistenceResult<Self> {
        Ok(DonorRecord {
            status: parse_enum("status", &row.status)?,
            screening_outcome: row
                .screening_outcome
                .as_deref()
                .map(|v| parse_enum("screening_outcome", v))
                .transpose()?,
            rejection_reasons: serde_json::from_str(&row.rejection_reasons)?,
            test_references: serde_json::from_str(&row.test_references)?,
            id: row.id,
            full_name: row.full_name,
            phone: row.phone,
            email: row.email,
            date_of_birth: row.date_of_birth,
            approval_signature: row.approval_signature,
            suspension_reason: row.suspension_reason,
            removal_reason: row.removal_reason,
            points_balance: row.points_balance,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            archived_at: row.archived_at,
        })
    }
}

/// Row type for `donor_events`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DonorEventRow {
    pub id: i64,
    pub donor_id: String,
    pub from_status: String,
    pub to_status: String,
    pub event: String,
    pub payload: String,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

/// One applied lifecycle transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonorHistoryEntry {
    pub id: i64,
    pub donor_id: String,
    pub from_status: DonorStatus,
    pub to_status: DonorStatus,
    pub event: String,
    pub payload: serde_json::Value,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

/// Insert form of [`DonorHistoryEntry`]
#[derive(Debug, Clone)]
pub struct NewDonorHistoryEntry {
    pub donor_id: String,
    pub from_status: DonorStatus,
    pub to_status: DonorStatus,
    pub event: String,
    pub payload: serde_json::Value,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DonorEventRow> for DonorHistoryEntry {
    type Error = PersistenceError;

    fn try_from(row: DonorEventRow) -> PersistenceResult<Self> {
        Ok(Self {
            id: row.id,
            from_status: parse_enum("from_status", &row.from_status)?,
            to_status: parse_enum("to_status", &row.to_status)?,
            payload: serde_json::from_str(&row.payload)?,
            donor_id: row.donor_id,
            event: row.event,
            actor_id: row.actor_id,
            created_at: row.created_at,
        })
    }
}

/// Row type for `resources`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResourceRow {
    pub id: String,
    pub name: String,
    pub appointment_type: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A bookable staff member or station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    pub name: String,
    pub appointment_type: AppointmentType,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ResourceRow> for ResourceRecord {
    type Error = PersistenceError;

    fn try_from(row: ResourceRow) -> PersistenceResult<Self> {
        Ok(Self {
            appointment_type: parse_enum("appointment_type", &row.appointment_type)?,
            id: row.id,
            name: row.name,
            active: row.active,
            created_at: row.created_at,
        })
    }
}

/// Row type for `appointments`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub donor_id: String,
    pub appointment_type: String,
    pub resource_id: String,
    pub slot_date: String,
    pub slot_time: String,
    pub status: String,
    pub failure_reason: Option<String>,
    pub failure_notes: Option<String>,
    pub cancelled_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = PersistenceError;

    fn try_from(row: AppointmentRow) -> PersistenceResult<Self> {
        Ok(Appointment {
            appointment_type: parse_enum("appointment_type", &row.appointment_type)?,
            slot_date: parse_date(&row.slot_date)?,
            slot_time: parse_time(&row.slot_time)?,
            status: parse_enum("status", &row.status)?,
            failure_reason: row
                .failure_reason
                .as_deref()
                .map(|v| parse_enum("failure_reason", v))
                .transpose()?,
            id: row.id,
            donor_id: row.donor_id,
            resource_id: row.resource_id,
            failure_notes: row.failure_notes,
            cancelled_by: row.cancelled_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Row type for `donation_visits`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VisitRow {
    pub id: String,
    pub appointment_id: String,
    pub donor_id: String,
    pub health_status: String,
    pub volume_ml: i64,
    pub container_count: i64,
    pub points_awarded: i64,
    pub notes: Option<String>,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
}

impl TryFrom<VisitRow> for DonationVisit {
    type Error = PersistenceError;

    fn try_from(row: VisitRow) -> PersistenceResult<Self> {
        Ok(DonationVisit {
            health_status: parse_enum("health_status", &row.health_status)?,
            id: row.id,
            appointment_id: row.appointment_id,
            donor_id: row.donor_id,
            volume_ml: row.volume_ml,
            container_count: row.container_count,
            points_awarded: row.points_awarded,
            notes: row.notes,
            recorded_by: row.recorded_by,
            recorded_at: row.recorded_at,
        })
    }
}

/// Row type for `ledger_entries`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerRow {
    pub donor_id: String,
    pub sequence: i64,
    pub delta: i64,
    pub reason: String,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = PersistenceError;

    fn try_from(row: LedgerRow) -> PersistenceResult<Self> {
        Ok(LedgerEntry {
            reason: parse_enum("reason", &row.reason)?,
            donor_id: row.donor_id,
            sequence: row.sequence,
            delta: row.delta,
            reference: row.reference,
            created_at: row.created_at,
        })
    }
}

/// Row type for `gifts`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GiftRow {
    pub id: String,
    pub name: String,
    pub point_cost: i64,
    pub stock: i64,
    pub created_at: DateTime<Utc>,
}

impl From<GiftRow> for Gift {
    fn from(row: GiftRow) -> Self {
        Gift {
            id: row.id,
            name: row.name,
            point_cost: row.point_cost,
            stock: row.stock,
            created_at: row.created_at,
        }
    }
}

// === Query filters ===

/// Whitelisted donor sort columns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonorSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    FullName,
    Status,
    PointsBalance,
}

impl DonorSort {
    pub fn column(&self) -> &'static str {
        match self {
            DonorSort::CreatedAt => "created_at",
            DonorSort::UpdatedAt => "updated_at",
            DonorSort::FullName => "full_name",
            DonorSort::Status => "status",
            DonorSort::PointsBalance => "points_balance",
        }
    }
}

impl FromStr for DonorSort {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at" => Ok(DonorSort::CreatedAt),
            "updated_at" => Ok(DonorSort::UpdatedAt),
            "full_name" => Ok(DonorSort::FullName),
            "status" => Ok(DonorSort::Status),
            "points_balance" => Ok(DonorSort::PointsBalance),
            other => Err(PersistenceError::InvalidEnumValue {
                field: "sort_by".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(PersistenceError::InvalidEnumValue {
                field: "order".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Donor listing filter
#[derive(Debug, Clone, Default)]
pub struct DonorFilter {
    pub status: Option<DonorStatus>,
    /// Substring over name, email and phone
    pub q: Option<String>,
    pub sort_by: DonorSort,
    pub order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

/// Appointment listing filter
#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub date: Option<NaiveDate>,
    pub resource_id: Option<String>,
    pub donor_id: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<AppointmentType>,
    pub limit: i64,
    pub offset: i64,
}
