//! MilkBank RPC - API/CLI orchestrator
//!
//! This crate wires configuration, the database and the services into an
//! [`AppContext`], serves the HTTP API and backs the `milkbank` binary.

pub mod commands;
pub mod config;
pub mod context;
pub mod http;

pub use config::{AppConfig, ConfigError};
pub use context::AppContext;
pub use http::create_router;
