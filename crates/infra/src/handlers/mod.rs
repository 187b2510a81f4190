//! Distributed event handlers for migration services.
//!
//! Every handler is the same shape: build the operation for its event, then
//! run it through [`crate::retry::EventRetryCoordinator::run`] with its own
//! context extractor and republish target.

pub mod apply_migrations;
pub mod connection_string_updated;
pub mod tenant_created;

pub use apply_migrations::ApplyDatabaseMigrationsHandler;
pub use connection_string_updated::TenantConnectionStringUpdatedHandler;
pub use tenant_created::TenantCreatedHandler;

pub use crate::retry::HandlerError;

use async_trait::async_trait;

use crate::lock::MigrationLock;
use crate::migration::MigrationError;
use crate::retry::HandleOutcome;
use crate::tenancy::MigrationScope;

#[async_trait]
pub trait EventHandler<E>: Send + Sync {
    async fn handle_event(&self, event: E) -> Result<HandleOutcome, HandlerError>;
}

/// Run `f` while holding the scope's lock, if a lock provider is configured.
pub(crate) async fn with_scope_lock<T, F, Fut>(
    lock: Option<&dyn MigrationLock>,
    scope: &MigrationScope,
    f: F,
) -> Result<T, MigrationError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, MigrationError>>,
{
    let _guard = match lock {
        Some(lock) => {
            let key = scope.lock_key();
            match lock.try_acquire(&key).await? {
                Some(guard) => Some(guard),
                None => return Err(MigrationError::LockBusy(key)),
            }
        }
        None => None,
    };

    f().await
}
