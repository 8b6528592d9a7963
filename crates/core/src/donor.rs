//! Donor record and eligibility lifecycle
//!
//! ```text
//! Pending ──screening(pass)──► Interviewed ──order_tests──► NeedsTests ──approve──► Approved
//!    │                                                          │                     │
//!    └─screening(fail)─► Rejected ◄──────reject─────────────────┤                  activate
//!                                                                │                     ▼
//!                              FailedPositive ◄──test(positive)──┘     Active ◄─reinstate─ Suspended
//!                                                                        └──suspend──────────►┘
//! Pending | Interviewed | NeedsTests ──abandon──► Abandoned
//! Approved | Active | Suspended ──remove──► Removed (archived)
//! ```
//!
//! Re-applying an event whose outcome already holds is a no-op. The same
//! event carrying different evidence is a conflict.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::{CoreError, CoreResult};
use crate::id::{new_id, DONOR_PREFIX};

/// Donor eligibility status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DonorStatus {
    Pending,
    Interviewed,
    NeedsTests,
    Approved,
    Rejected,
    Active,
    Suspended,
    Removed,
    FailedPositive,
    Abandoned,
}

impl DonorStatus {
    /// No outgoing edges except idempotent re-application
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DonorStatus::Rejected
                | DonorStatus::Removed
                | DonorStatus::FailedPositive
                | DonorStatus::Abandoned
        )
    }

    /// States an inactivity timeout can abandon
    pub fn is_pre_approval(&self) -> bool {
        matches!(
            self,
            DonorStatus::Pending | DonorStatus::Interviewed | DonorStatus::NeedsTests
        )
    }

    /// Declared successors in the lifecycle graph (self-loops included where
    /// an event records evidence without moving)
    pub fn successors(&self) -> &'static [DonorStatus] {
        use DonorStatus::*;
        match self {
            Pending => &[Interviewed, Rejected, Abandoned],
            Interviewed => &[NeedsTests, Rejected, Abandoned],
            NeedsTests => &[NeedsTests, Approved, Rejected, FailedPositive, Abandoned],
            Approved => &[Active, Removed],
            Active => &[Suspended, Removed],
            Suspended => &[Active, Removed],
            Rejected | Removed | FailedPositive | Abandoned => &[],
        }
    }
}

/// Result of the screening interview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScreeningOutcome {
    Pass,
    Fail,
}

/// EHR lab outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    Clear,
    Positive,
}

/// Reference to an externally held EHR test result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReference {
    pub reference: String,
    pub result: TestResult,
    pub received_at: DateTime<Utc>,
}

/// Lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DonorEvent {
    CompleteScreening {
        outcome: ScreeningOutcome,
        #[serde(default)]
        reasons: Vec<String>,
    },
    OrderTests,
    ReceiveTestResult {
        result: TestResult,
        reference: String,
    },
    Approve {
        signature: String,
    },
    Reject {
        reasons: Vec<String>,
    },
    Activate,
    Suspend {
        reason: String,
    },
    Reinstate,
    Remove {
        reason: String,
    },
    Abandon,
}

impl DonorEvent {
    /// Event name as stored in the donor event log
    pub fn name(&self) -> &'static str {
        match self {
            DonorEvent::CompleteScreening { .. } => "complete_screening",
            DonorEvent::OrderTests => "order_tests",
            DonorEvent::ReceiveTestResult { .. } => "receive_test_result",
            DonorEvent::Approve { .. } => "approve",
            DonorEvent::Reject { .. } => "reject",
            DonorEvent::Activate => "activate",
            DonorEvent::Suspend { .. } => "suspend",
            DonorEvent::Reinstate => "reinstate",
            DonorEvent::Remove { .. } => "remove",
            DonorEvent::Abandon => "abandon",
        }
    }

    /// Input checks that do not depend on the donor's state
    pub fn validate(&self) -> CoreResult<()> {
        match self {
            DonorEvent::CompleteScreening {
                outcome: ScreeningOutcome::Fail,
                reasons,
            }
            | DonorEvent::Reject { reasons } => {
                if normalize_reasons(reasons).is_empty() {
                    return Err(CoreError::RejectionRequiresReason);
                }
            }
            DonorEvent::ReceiveTestResult { reference, .. } if reference.trim().is_empty() => {
                return Err(CoreError::validation("test reference cannot be empty"));
            }
            DonorEvent::Approve { signature } if signature.trim().is_empty() => {
                return Err(CoreError::validation("approval signature cannot be empty"));
            }
            DonorEvent::Suspend { reason } | DonorEvent::Remove { reason }
                if reason.trim().is_empty() =>
            {
                return Err(CoreError::validation(format!(
                    "{} requires a reason",
                    self.name()
                )));
            }
            _ => {}
        }
        Ok(())
    }
}

/// What `DonorRecord::apply` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// State (or recorded evidence) changed
    Applied { from: DonorStatus, to: DonorStatus },
    /// Outcome was already realized
    NoOp,
}

impl TransitionOutcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, TransitionOutcome::NoOp)
    }
}

/// Registration input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDonor {
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
}

impl NewDonor {
    pub fn validate(&self) -> CoreResult<()> {
        if self.full_name.trim().is_empty() {
            return Err(CoreError::validation("full_name cannot be empty"));
        }
        let phone = self.phone.as_deref().map(str::trim).unwrap_or_default();
        let email = self.email.as_deref().map(str::trim).unwrap_or_default();
        if phone.is_empty() && email.is_empty() {
            return Err(CoreError::validation("a phone number or email is required"));
        }
        if !email.is_empty() && !email.contains('@') {
            return Err(CoreError::validation(format!("invalid email: {}", email)));
        }
        Ok(())
    }
}

/// A registered donor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonorRecord {
    pub id: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub status: DonorStatus,
    pub screening_outcome: Option<ScreeningOutcome>,
    pub rejection_reasons: Vec<String>,
    pub test_references: Vec<TestReference>,
    pub approval_signature: Option<String>,
    pub suspension_reason: Option<String>,
    pub removal_reason: Option<String>,
    /// Cached ledger balance; written only by the points ledger
    pub points_balance: i64,
    /// Optimistic concurrency token
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

enum Step {
    To(DonorStatus),
    NoOp,
}

impl DonorRecord {
    /// Create a new Pending donor
    pub fn register(new: NewDonor, now: DateTime<Utc>) -> CoreResult<Self> {
        new.validate()?;
        let clean = |v: Option<String>| {
            v.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        Ok(Self {
            id: new_id(DONOR_PREFIX),
            full_name: new.full_name.trim().to_string(),
            phone: clean(new.phone),
            email: clean(new.email),
            date_of_birth: new.date_of_birth,
            status: DonorStatus::Pending,
            screening_outcome: None,
            rejection_reasons: Vec::new(),
            test_references: Vec::new(),
            approval_signature: None,
            suspension_reason: None,
            removal_reason: None,
            points_balance: 0,
            version: 0,
            created_at: now,
            updated_at: now,
            archived_at: None,
        })
    }

    pub fn has_clear_test(&self) -> bool {
        self.test_references
            .iter()
            .any(|t| t.result == TestResult::Clear)
    }

    /// Apply a lifecycle event in place
    pub fn apply(&mut self, event: &DonorEvent, now: DateTime<Utc>) -> CoreResult<TransitionOutcome> {
        use DonorStatus::*;

        event.validate()?;
        let from = self.status;

        let step = match (from, event) {
            (Pending, DonorEvent::CompleteScreening { outcome, .. }) => match outcome {
                ScreeningOutcome::Pass => Step::To(Interviewed),
                ScreeningOutcome::Fail => Step::To(Rejected),
            },
            (Interviewed | NeedsTests, DonorEvent::CompleteScreening { outcome, .. }) => {
                match outcome {
                    ScreeningOutcome::Pass => Step::NoOp,
                    ScreeningOutcome::Fail => return Err(self.conflict(event)),
                }
            }
            (
                Rejected,
                DonorEvent::CompleteScreening {
                    outcome: ScreeningOutcome::Fail,
                    reasons,
                }
                | DonorEvent::Reject { reasons },
            ) => {
                if normalize_reasons(reasons) == self.rejection_reasons {
                    Step::NoOp
                } else {
                    return Err(self.conflict(event));
                }
            }

            (Interviewed, DonorEvent::OrderTests) => Step::To(NeedsTests),
            (NeedsTests, DonorEvent::OrderTests) => Step::NoOp,

            (NeedsTests, DonorEvent::ReceiveTestResult { result, reference }) => {
                let reference = reference.trim();
                match self.test_references.iter().find(|t| t.reference == reference) {
                    Some(existing) if existing.result == *result => Step::NoOp,
                    Some(_) => return Err(self.conflict(event)),
                    None => match result {
                        TestResult::Clear => Step::To(NeedsTests),
                        TestResult::Positive => Step::To(FailedPositive),
                    },
                }
            }
            (
                FailedPositive,
                DonorEvent::ReceiveTestResult {
                    result: TestResult::Positive,
                    ..
                },
            ) => Step::NoOp,

            (NeedsTests, DonorEvent::Approve { .. }) => {
                if !self.has_clear_test() {
                    return Err(CoreError::TestsOutstanding);
                }
                Step::To(Approved)
            }
            (Approved, DonorEvent::Approve { signature }) => {
                if self.approval_signature.as_deref() == Some(signature.as_str()) {
                    Step::NoOp
                } else {
                    return Err(self.conflict(event));
                }
            }

            (Pending | Interviewed | NeedsTests, DonorEvent::Reject { .. }) => Step::To(Rejected),

            (Approved, DonorEvent::Activate) => Step::To(Active),
            (Active, DonorEvent::Activate | DonorEvent::Reinstate) => Step::NoOp,

            (Active, DonorEvent::Suspend { .. }) => Step::To(Suspended),
            (Suspended, DonorEvent::Suspend { reason }) => {
                if self.suspension_reason.as_deref() == Some(reason.trim()) {
                    Step::NoOp
                } else {
                    return Err(self.conflict(event));
                }
            }
            (Suspended, DonorEvent::Reinstate) => Step::To(Active),

            (Approved | Active | Suspended, DonorEvent::Remove { .. }) => Step::To(Removed),
            (Removed, DonorEvent::Remove { reason }) => {
                if self.removal_reason.as_deref() == Some(reason.trim()) {
                    Step::NoOp
                } else {
                    return Err(self.conflict(event));
                }
            }

            (Pending | Interviewed | NeedsTests, DonorEvent::Abandon) => Step::To(Abandoned),
            (Abandoned, DonorEvent::Abandon) => Step::NoOp,

            _ => return Err(CoreError::invalid_transition("donor", from, event.name())),
        };

        let to = match step {
            Step::NoOp => return Ok(TransitionOutcome::NoOp),
            Step::To(to) => to,
        };

        self.record_evidence(event, now);
        self.status = to;
        self.updated_at = now;

        Ok(TransitionOutcome::Applied { from, to })
    }

    fn record_evidence(&mut self, event: &DonorEvent, now: DateTime<Utc>) {
        match event {
            DonorEvent::CompleteScreening { outcome, reasons } => {
                self.screening_outcome = Some(*outcome);
                if *outcome == ScreeningOutcome::Fail {
                    self.rejection_reasons = normalize_reasons(reasons);
                }
            }
            DonorEvent::ReceiveTestResult { result, reference } => {
                self.test_references.push(TestReference {
                    reference: reference.trim().to_string(),
                    result: *result,
                    received_at: now,
                });
            }
            DonorEvent::Approve { signature } => {
                self.approval_signature = Some(signature.clone());
            }
            DonorEvent::Reject { reasons } => {
                self.rejection_reasons = normalize_reasons(reasons);
            }
            DonorEvent::Suspend { reason } => {
                self.suspension_reason = Some(reason.trim().to_string());
            }
            DonorEvent::Reinstate => {
                self.suspension_reason = None;
            }
            DonorEvent::Remove { reason } => {
                self.removal_reason = Some(reason.trim().to_string());
                self.archived_at = Some(now);
            }
            DonorEvent::OrderTests | DonorEvent::Activate | DonorEvent::Abandon => {}
        }
    }

    fn conflict(&self, event: &DonorEvent) -> CoreError {
        CoreError::ConflictingEvidence {
            entity: "donor",
            state: self.status.to_string(),
            event: event.name().to_string(),
        }
    }
}

/// Trim, drop blanks, sort and deduplicate a reason set
pub fn normalize_reasons(reasons: &[String]) -> Vec<String> {
    let mut out: Vec<String> = reasons
        .iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
