//! Approval session state
//!
//! ```text
//! NotStarted ──initiate──▶ AwaitingChallenge ──submit──▶ Verifying ──▶ Completed
//!     ▲                        │    ▲                       │
//!     └──expire / cancel───────┘    └──wrong code / retry───┤
//!     ▲                                                     └──▶ Failed
//!     └──────────────── lease lapsed ──── Verifying
//! ```
//!
//! Sessions are one per donor. Every method here is a pure state change;
//! the workflow persists the result with a version guard.
//!
//! Verifying holds a lease. A session whose lease lapsed is treated like an
//! expired challenge, so a verification that never finished cannot pin the
//! donor.

use chrono::{DateTime, Utc};
use milkbank_core::CoreError;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{ApprovalError, ApprovalResult};

/// Approval session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    NotStarted,
    AwaitingChallenge,
    Verifying,
    Completed,
    Failed,
}

/// Signing session for one donor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSession {
    pub donor_id: String,
    pub state: ApprovalState,
    pub provider_id: Option<String>,
    /// SHA-256 of the consent text the donor previewed
    pub document_hash: Option<String>,
    /// Pending provider transaction; only one is valid at a time
    pub transaction_id: Option<String>,
    pub challenge_expires_at: Option<DateTime<Utc>>,
    /// Set while Verifying; past it the verification is presumed dead
    pub verify_lease_until: Option<DateTime<Utc>>,
    /// Wrong codes submitted against the current challenge series
    pub attempts: i64,
    pub artifact_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalSession {
    pub fn new(donor_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            donor_id: donor_id.into(),
            state: ApprovalState::NotStarted,
            provider_id: None,
            document_hash: None,
            transaction_id: None,
            challenge_expires_at: None,
            verify_lease_until: None,
            attempts: 0,
            artifact_ref: None,
            failure_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// An AwaitingChallenge session whose window has closed, or a Verifying
    /// session whose lease has lapsed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            ApprovalState::AwaitingChallenge => {
                self.challenge_expires_at.is_some_and(|at| at <= now)
            }
            ApprovalState::Verifying => self.verify_lease_until.map_or(true, |at| at <= now),
            _ => false,
        }
    }

    fn invalid(&self, operation: &str) -> ApprovalError {
        CoreError::invalid_transition("approval", self.state, operation).into()
    }

    /// Failed sessions restart from NotStarted; other states stay put
    fn restart_if_failed(&mut self) {
        if self.state == ApprovalState::Failed {
            self.state = ApprovalState::NotStarted;
            self.transaction_id = None;
            self.challenge_expires_at = None;
            self.attempts = 0;
            self.failure_reason = None;
        }
    }

    pub fn record_preview(&mut self, document_hash: String, now: DateTime<Utc>) -> ApprovalResult<()> {
        if !matches!(self.state, ApprovalState::NotStarted | ApprovalState::Failed) {
            return Err(self.invalid("preview_consent_document"));
        }
        self.restart_if_failed();
        self.document_hash = Some(document_hash);
        self.updated_at = now;
        Ok(())
    }

    pub fn select_provider(&mut self, provider_id: &str, now: DateTime<Utc>) -> ApprovalResult<()> {
        if !matches!(self.state, ApprovalState::NotStarted | ApprovalState::Failed) {
            return Err(self.invalid("select_provider"));
        }
        self.restart_if_failed();
        self.provider_id = Some(provider_id.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// NotStarted → AwaitingChallenge
    pub fn begin_challenge(
        &mut self,
        transaction_id: String,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        if self.state != ApprovalState::NotStarted {
            return Err(self.invalid("initiate_signing"));
        }
        self.state = ApprovalState::AwaitingChallenge;
        self.transaction_id = Some(transaction_id);
        self.challenge_expires_at = Some(expires_at);
        self.attempts = 0;
        self.updated_at = now;
        Ok(())
    }

    /// Swap in a fresh challenge; returns the superseded transaction id
    pub fn resend(
        &mut self,
        transaction_id: String,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Option<String>> {
        if self.state != ApprovalState::AwaitingChallenge {
            return Err(self.invalid("resend_challenge"));
        }
        let previous = self.transaction_id.replace(transaction_id);
        self.challenge_expires_at = Some(expires_at);
        self.updated_at = now;
        Ok(previous)
    }

    /// AwaitingChallenge (or Verifying with a lapsed lease) → NotStarted;
    /// returns the dropped transaction id
    pub fn expire(&mut self, now: DateTime<Utc>) -> Option<String> {
        match self.state {
            ApprovalState::AwaitingChallenge => {}
            ApprovalState::Verifying if self.is_expired(now) => {}
            _ => return None,
        }
        self.state = ApprovalState::NotStarted;
        self.challenge_expires_at = None;
        self.verify_lease_until = None;
        self.attempts = 0;
        self.updated_at = now;
        self.transaction_id.take()
    }

    /// Abandon the pending challenge. NotStarted and Failed are no-ops; a
    /// Verifying session can only be cancelled once its lease lapsed.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> ApprovalResult<Option<String>> {
        match self.state {
            ApprovalState::AwaitingChallenge => Ok(self.expire(now)),
            ApprovalState::Verifying if self.is_expired(now) => Ok(self.expire(now)),
            ApprovalState::NotStarted | ApprovalState::Failed => Ok(None),
            ApprovalState::Verifying | ApprovalState::Completed => Err(self.invalid("cancel")),
        }
    }

    /// AwaitingChallenge → Verifying for the current, unexpired transaction,
    /// leased until `lease_until`
    pub fn start_verifying(
        &mut self,
        transaction_id: &str,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        match self.state {
            ApprovalState::AwaitingChallenge => {}
            ApprovalState::Verifying => return Err(self.invalid("submit_challenge")),
            _ => return Err(ApprovalError::stale("no challenge is pending")),
        }
        if self.is_expired(now) {
            return Err(ApprovalError::stale("challenge window has closed"));
        }
        if self.transaction_id.as_deref() != Some(transaction_id) {
            return Err(ApprovalError::stale("challenge was superseded"));
        }
        self.state = ApprovalState::Verifying;
        self.verify_lease_until = Some(lease_until);
        self.updated_at = now;
        Ok(())
    }

    /// Verifying → AwaitingChallenge, or Failed once `max_attempts` wrong
    /// codes are in. Returns the attempts left.
    pub fn wrong_code(&mut self, max_attempts: i64, now: DateTime<Utc>) -> i64 {
        self.attempts += 1;
        let remaining = (max_attempts - self.attempts).max(0);
        if remaining == 0 {
            self.fail("too many wrong codes", now);
        } else {
            self.state = ApprovalState::AwaitingChallenge;
            self.verify_lease_until = None;
            self.updated_at = now;
        }
        remaining
    }

    /// Verifying → AwaitingChallenge without consuming an attempt
    pub fn verification_unavailable(&mut self, now: DateTime<Utc>) {
        if self.state == ApprovalState::Verifying {
            self.state = ApprovalState::AwaitingChallenge;
            self.verify_lease_until = None;
            self.updated_at = now;
        }
    }

    pub fn complete(&mut self, artifact_ref: String, now: DateTime<Utc>) {
        self.state = ApprovalState::Completed;
        self.artifact_ref = Some(artifact_ref);
        self.transaction_id = None;
        self.challenge_expires_at = None;
        self.verify_lease_until = None;
        self.updated_at = now;
    }

    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.state = ApprovalState::Failed;
        self.failure_reason = Some(reason.into());
        self.transaction_id = None;
        self.challenge_expires_at = None;
        self.verify_lease_until = None;
        self.updated_at = now;
    }
}
