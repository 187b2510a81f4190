//! Shared primitives for migration coordination.
//!
//! This crate contains identifiers and the domain error model only (no IO).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{DatabaseName, MigrationId, TenantId};
