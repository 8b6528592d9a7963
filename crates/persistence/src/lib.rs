//! # MilkBank Persistence
//!
//! SQLite storage for donors, appointments, visits, the points ledger and the
//! gift catalog.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Database                        │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────┐  │
//! │  │ SqlitePool  │    │   SCHEMA    │    │  Repos   │  │
//! │  │  (WAL)      │    │  (indexes)  │    │ (1 stmt) │  │
//! │  └─────────────┘    └─────────────┘    └──────────┘  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use milkbank_persistence::{Database, DonorRepo};
//!
//! let db = Database::init("sqlite:milkbank.db").await?;
//!
//! let mut tx = db.pool().begin().await?;
//! DonorRepo::insert(&mut *tx, &donor).await?;
//! tx.commit().await?;
//! ```

pub mod error;
pub mod sqlite;

pub use error::{PersistenceError, PersistenceResult};
pub use sqlite::repos::apply_schema;
pub use sqlite::{
    create_pool, init_database, AppointmentFilter, AppointmentRepo, DonorEventRepo, DonorFilter,
    DonorHistoryEntry, DonorRepo, DonorSort, GiftRepo, LedgerRepo, NewDonorHistoryEntry,
    ResourceRecord, ResourceRepo, SortOrder, VisitRepo, SCHEMA,
};

use sqlx::SqlitePool;

/// Database facade
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open a database without touching the schema
    pub async fn connect(database_url: &str) -> PersistenceResult<Self> {
        Ok(Self {
            pool: create_pool(database_url).await?,
        })
    }

    /// Open a database and create the schema if missing
    pub async fn init(database_url: &str) -> PersistenceResult<Self> {
        Ok(Self {
            pool: init_database(database_url).await?,
        })
    }

    /// Fresh private in-memory database with the schema applied
    pub async fn in_memory() -> PersistenceResult<Self> {
        Self::init("sqlite::memory:").await
    }

    /// Get SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
