//! MilkBank Core - domain types and pure state machines
//!
//! Nothing in this crate touches storage. Every state change is a pure
//! function over a value, so the service layer can run it inside whatever
//! transaction it holds.
//!
//! # Key Types
//! - `DonorRecord` / `DonorEvent`: eligibility lifecycle
//! - `Appointment` / `AppointmentCommand`: appointment status machine
//! - `DonationReport`: validated health-check + volume input
//! - `points_for_volume`: reward tier table
//! - `Actor`, `Role`, `Resource`, `Action`: authorization vocabulary

pub mod access;
pub mod appointment;
pub mod donor;
pub mod error;
pub mod id;
pub mod points;
pub mod visit;

pub use access::{Action, Actor, Resource, Role};
pub use appointment::{
    Appointment, AppointmentCommand, AppointmentStatus, AppointmentType, FailureReason, Slot,
};
pub use donor::{
    DonorEvent, DonorRecord, DonorStatus, NewDonor, ScreeningOutcome, TestReference, TestResult,
    TransitionOutcome,
};
pub use error::{CoreError, CoreResult};
pub use points::{points_for_volume, Gift, LedgerEntry, LedgerReason, NewGift};
pub use visit::{DonationReport, DonationVisit, HealthStatus};
