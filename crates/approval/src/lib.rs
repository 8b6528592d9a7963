//! # MilkBank Approval Module
//!
//! Signed approval of donors who passed their screening tests.
//!
//! ## Flow
//! - Preview the consent document (its SHA-256 is what gets signed)
//! - Select a CA provider from the registry
//! - The provider issues a challenge code to the donor
//! - Submitting the code verifies it and approves the donor in the same
//!   transaction that completes the session
//!
//! ## Features
//! - One session per donor, version-guarded like donor records
//! - 5 minute challenge window by default, expired lazily and by sweep
//! - Bounded retry on transient provider failures
//! - Resend and cancel invalidate the previous transaction at the provider

pub mod config;
pub mod consent;
pub mod error;
pub mod mock;
pub mod provider;
pub mod session;
pub mod store;
pub mod workflow;

pub use config::ApprovalConfig;
pub use consent::ConsentDocument;
pub use error::{ApprovalError, ApprovalResult};
pub use mock::MockCaProvider;
pub use provider::{
    CaProvider, ProviderChallenge, ProviderError, ProviderInfo, ProviderRegistry, SigningRequest,
    VerifyOutcome,
};
pub use session::{ApprovalSession, ApprovalState};
pub use store::SessionStore;
pub use workflow::ApprovalWorkflow;
