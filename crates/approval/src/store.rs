//! SQLite storage for approval sessions
//!
//! Same conventions as the persistence repos: one statement per function,
//! generic over `SqliteExecutor`, version-guarded updates.

use chrono::{DateTime, Utc};
use milkbank_persistence::{PersistenceError, PersistenceResult};
use sqlx::SqliteExecutor;

use crate::session::{ApprovalSession, ApprovalState};

#[derive(Debug, Clone, sqlx::FromRow)]
struct SessionRow {
    donor_id: String,
    state: String,
    provider_id: Option<String>,
    document_hash: Option<String>,
    transaction_id: Option<String>,
    challenge_expires_at: Option<DateTime<Utc>>,
    verify_lease_until: Option<DateTime<Utc>>,
    attempts: i64,
    artifact_ref: Option<String>,
    failure_reason: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for ApprovalSession {
    type Error = PersistenceError;

    fn try_from(row: SessionRow) -> PersistenceResult<Self> {
        let state = row
            .state
            .parse::<ApprovalState>()
            .map_err(|_| PersistenceError::InvalidEnumValue {
                field: "state".to_string(),
                value: row.state.clone(),
            })?;
        Ok(ApprovalSession {
            donor_id: row.donor_id,
            state,
            provider_id: row.provider_id,
            document_hash: row.document_hash,
            transaction_id: row.transaction_id,
            challenge_expires_at: row.challenge_expires_at,
            verify_lease_until: row.verify_lease_until,
            attempts: row.attempts,
            artifact_ref: row.artifact_ref,
            failure_reason: row.failure_reason,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for `approval_sessions`
pub struct SessionStore;

impl SessionStore {
    pub async fn get<'e, E: SqliteExecutor<'e>>(
        exec: E,
        donor_id: &str,
    ) -> PersistenceResult<Option<ApprovalSession>> {
        sqlx::query_as::<_, SessionRow>("SELECT * FROM approval_sessions WHERE donor_id = ?")
            .bind(donor_id)
            .fetch_optional(exec)
            .await?
            .map(ApprovalSession::try_from)
            .transpose()
    }

    /// Insert a fresh session; `AlreadyExists` when another writer got there
    /// first
    pub async fn insert<'e, E: SqliteExecutor<'e>>(
        exec: E,
        session: &ApprovalSession,
    ) -> PersistenceResult<()> {
        sqlx::query(
            r#"INSERT INTO approval_sessions (
                donor_id, state, provider_id, document_hash, transaction_id,
                challenge_expires_at, verify_lease_until, attempts, artifact_ref,
                failure_reason, version, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&session.donor_id)
        .bind(session.state.to_string())
        .bind(&session.provider_id)
        .bind(&session.document_hash)
        .bind(&session.transaction_id)
        .bind(session.challenge_expires_at)
        .bind(session.verify_lease_until)
        .bind(session.attempts)
        .bind(&session.artifact_ref)
        .bind(&session.failure_reason)
        .bind(session.version)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(exec)
        .await
        .map_err(|e| match PersistenceError::from_sqlx(e) {
            PersistenceError::UniqueViolation(_) => {
                PersistenceError::already_exists("ApprovalSession", &session.donor_id)
            }
            other => other,
        })?;
        Ok(())
    }

    /// Write the session if the stored version still equals
    /// `expected_version`; bumps the version
    pub async fn update_versioned<'e, E: SqliteExecutor<'e>>(
        exec: E,
        session: &ApprovalSession,
        expected_version: i64,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            r#"UPDATE approval_sessions SET
                state = ?, provider_id = ?, document_hash = ?, transaction_id = ?,
                challenge_expires_at = ?, verify_lease_until = ?, attempts = ?,
                artifact_ref = ?, failure_reason = ?, version = version + 1, updated_at = ?
            WHERE donor_id = ? AND version = ?"#,
        )
        .bind(session.state.to_string())
        .bind(&session.provider_id)
        .bind(&session.document_hash)
        .bind(&session.transaction_id)
        .bind(session.challenge_expires_at)
        .bind(session.verify_lease_until)
        .bind(session.attempts)
        .bind(&session.artifact_ref)
        .bind(&session.failure_reason)
        .bind(session.updated_at)
        .bind(&session.donor_id)
        .bind(expected_version)
        .execute(exec)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    /// AwaitingChallenge sessions whose window closed at or before `now`, and
    /// Verifying sessions whose lease lapsed by then
    pub async fn find_expired<'e, E: SqliteExecutor<'e>>(
        exec: E,
        now: DateTime<Utc>,
    ) -> PersistenceResult<Vec<ApprovalSession>> {
        sqlx::query_as::<_, SessionRow>(
            r#"SELECT * FROM approval_sessions
            WHERE (state = 'awaiting_challenge' AND challenge_expires_at <= ?)
               OR (state = 'verifying' AND (verify_lease_until IS NULL OR verify_lease_until <= ?))
            ORDER BY updated_at ASC"#,
        )
        .bind(now)
        .bind(now)
        .fetch_all(exec)
        .await?
        .into_iter()
        .map(ApprovalSession::try_from)
        .collect()
    }
}
