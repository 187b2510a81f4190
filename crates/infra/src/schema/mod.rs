//! Schema runner abstraction ("apply pending schema changes").
//!
//! A runner is a handle bound to one [`crate::tenancy::MigrationScope`]; units of
//! work hand it out (see [`crate::uow::UnitOfWork::schema`]). How migrations are
//! discovered and applied is the runner's business.

pub mod in_memory;
pub mod postgres;

pub use in_memory::{AppliedMigration, InMemorySchemaRunner, InMemorySchemaState};
pub use postgres::{PostgresSchemaRunner, PostgresUnitOfWorkManager};

use async_trait::async_trait;
use thiserror::Error;

use fleetmig_core::MigrationId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Pending migrations could not be listed.
    #[error("failed to query pending migrations: {0}")]
    Query(String),

    /// Applying migrations failed; nothing is reported as applied.
    #[error("failed to apply migrations: {0}")]
    Apply(String),

    /// The database could not be reached.
    #[error("database unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SchemaRunner: Send + Sync {
    /// Migrations known to the runner but not yet applied, in apply order.
    async fn pending_migrations(&self) -> Result<Vec<MigrationId>, SchemaError>;

    /// Apply every pending migration as a single operation.
    async fn apply(&self) -> Result<(), SchemaError>;
}
