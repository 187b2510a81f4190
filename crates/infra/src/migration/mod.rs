//! Schema migration execution for one tenant scope.

pub mod executor;
pub mod seed;

pub use executor::MigrationExecutor;
pub use seed::{DataSeeder, NoopDataSeeder, RecordingDataSeeder, SeedError};

use thiserror::Error;

use fleetmig_core::DomainError;

use crate::lock::LockError;
use crate::retry::RetryableError;
use crate::schema::SchemaError;
use crate::tenancy::TenantStoreError;
use crate::uow::UnitOfWorkError;

/// Anything that can go wrong while migrating (or seeding) one scope.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error(transparent)]
    Tenant(#[from] TenantStoreError),

    #[error(transparent)]
    UnitOfWork(#[from] UnitOfWorkError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Lock(#[from] LockError),

    /// Another caller holds the lock for this (tenant, database) pair.
    #[error("migration lock busy: {0}")]
    LockBusy(String),

    /// The event itself is malformed (e.g. blank database name).
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl MigrationError {
    /// Failures caused by the input rather than the environment.
    ///
    /// These are defects: retrying cannot fix them, so they propagate out of the
    /// handler instead of being republished.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            MigrationError::Tenant(TenantStoreError::NotFound(_)) | MigrationError::Domain(_)
        )
    }
}

impl RetryableError for MigrationError {
    fn is_resolution_failure(&self) -> bool {
        MigrationError::is_resolution_failure(self)
    }
}
