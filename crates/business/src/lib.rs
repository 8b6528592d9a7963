//! # MilkBank Business
//!
//! Business logic layer - donor lifecycle, appointment scheduling, donation
//! visits and the reward points ledger.
//!
//! Every service borrows a [`ServiceContext`] and checks the permission
//! registry on entry:
//!
//! ```rust,ignore
//! let ctx = ServiceContext::new(&db, registry, ServiceConfig::default());
//! let donor = DonorService::new(&ctx).register(&actor, new_donor).await?;
//! let slots = AppointmentScheduler::new(&ctx)
//!     .list_available_slots(&actor, from, to, AppointmentType::Screening)
//!     .await?;
//! ```

pub mod config;
pub mod donor;
pub mod error;
pub mod ledger;
pub mod scheduler;
pub mod services;
pub mod visit;

pub use config::{LifecycleConfig, SchedulerConfig, ServiceConfig};
pub use donor::{required_action, write_transition, DonorQuery, DonorService};
pub use error::{BusinessError, BusinessResult, ErrorCategory};
pub use ledger::{BalanceCheck, Redemption, RewardPointsLedger};
pub use scheduler::{AppointmentQuery, AppointmentScheduler, AvailableSlots, NewResource};
pub use services::{Page, PageWindow, Pagination, ServiceContext};
pub use visit::DonationVisitProcessor;
