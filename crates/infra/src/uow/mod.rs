//! Unit of work: a bounded scope of data operations bound to one tenant.
//!
//! A scope is released when it is dropped, whether or not `complete()` ran, so
//! every exit path (success, early return, error, panic unwind) releases it.

pub mod in_memory;

pub use in_memory::{InMemoryUnitOfWorkManager, UnitOfWorkStats};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::schema::SchemaRunner;
use crate::tenancy::MigrationScope;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnitOfWorkOptions {
    /// Start an independent scope even if the caller already has one.
    pub requires_new: bool,
    pub is_transactional: bool,
}

impl UnitOfWorkOptions {
    /// Options for schema migrations: independent and non-transactional, since
    /// migration commands commonly self-commit and cannot join an ambient transaction.
    pub fn schema_migration() -> Self {
        Self {
            requires_new: true,
            is_transactional: false,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnitOfWorkError {
    #[error("failed to begin unit of work: {0}")]
    Begin(String),

    #[error("failed to complete unit of work: {0}")]
    Complete(String),

    #[error("unit of work already completed")]
    AlreadyCompleted,

    #[error("unsupported unit of work options: {0}")]
    Unsupported(String),
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    fn id(&self) -> u64;

    fn scope(&self) -> &MigrationScope;

    fn options(&self) -> UnitOfWorkOptions;

    /// Schema-context handle for this scope.
    fn schema(&self) -> Arc<dyn SchemaRunner>;

    /// Commit tracked changes. Callable once.
    async fn complete(&mut self) -> Result<(), UnitOfWorkError>;
}

#[async_trait]
pub trait UnitOfWorkManager: Send + Sync {
    async fn begin(
        &self,
        scope: &MigrationScope,
        options: UnitOfWorkOptions,
    ) -> Result<Box<dyn UnitOfWork>, UnitOfWorkError>;
}

#[async_trait]
impl<M> UnitOfWorkManager for Arc<M>
where
    M: UnitOfWorkManager + ?Sized,
{
    async fn begin(
        &self,
        scope: &MigrationScope,
        options: UnitOfWorkOptions,
    ) -> Result<Box<dyn UnitOfWork>, UnitOfWorkError> {
        (**self).begin(scope, options).await
    }
}
