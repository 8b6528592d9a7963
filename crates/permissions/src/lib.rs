//! MilkBank Permissions - deny-by-default authorization gate
//!
//! A permission is a registered `(resource, action)` pair. Roles are granted
//! permissions many-to-many. The registry is read-mostly: lookups take a read
//! lock on the current snapshot and a policy reload swaps the whole snapshot
//! in one write.

pub mod error;
pub mod policy;
pub mod registry;

pub use error::{PermissionError, PermissionResult};
pub use policy::{default_policy, Permission, Policy};
pub use registry::PermissionRegistry;
