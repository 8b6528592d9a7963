//! SQLite persistence module
//!
//! Repository pattern over a shared `SqlitePool`. Every repo function is a
//! single statement generic over `SqliteExecutor`, so callers compose them
//! inside their own transaction.

pub mod repos;
pub mod schema;

pub use repos::{
    create_pool, init_database, AppointmentRepo, DonorEventRepo, DonorRepo, GiftRepo,
    LedgerRepo, ResourceRepo, VisitRepo,
};
pub use schema::{
    AppointmentFilter, DonorFilter, DonorHistoryEntry, DonorSort, NewDonorHistoryEntry,
    ResourceRecord, SortOrder, SCHEMA,
};
