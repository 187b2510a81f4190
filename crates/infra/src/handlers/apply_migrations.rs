use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use fleetmig_core::DatabaseName;
use fleetmig_events::{ApplyDatabaseMigrations, EventBus};

use super::{EventHandler, HandlerError, with_scope_lock};
use crate::lock::MigrationLock;
use crate::migration::{MigrationError, MigrationExecutor};
use crate::retry::{EventRetryCoordinator, HandleOutcome, RetryContext};
use crate::tenancy::{MigrationScope, TenantContext};

/// Applies pending migrations for the service's own database when asked to.
///
/// Events naming another service's database are ignored.
pub struct ApplyDatabaseMigrationsHandler<B> {
    database: DatabaseName,
    executor: MigrationExecutor,
    coordinator: EventRetryCoordinator,
    bus: B,
    lock: Option<Arc<dyn MigrationLock>>,
}

impl<B> ApplyDatabaseMigrationsHandler<B>
where
    B: EventBus<ApplyDatabaseMigrations>,
{
    pub fn new(
        database: DatabaseName,
        executor: MigrationExecutor,
        coordinator: EventRetryCoordinator,
        bus: B,
    ) -> Self {
        Self {
            database,
            executor,
            coordinator,
            bus,
            lock: None,
        }
    }

    /// Serialize attempts on the same (tenant, database) pair through `lock`.
    pub fn with_lock(mut self, lock: Arc<dyn MigrationLock>) -> Self {
        self.lock = Some(lock);
        self
    }
}

fn retry_context(event: &ApplyDatabaseMigrations) -> RetryContext {
    RetryContext::new(event.tenant_id, format!("database={}", event.database_name))
}

#[async_trait]
impl<B> EventHandler<ApplyDatabaseMigrations> for ApplyDatabaseMigrationsHandler<B>
where
    B: EventBus<ApplyDatabaseMigrations>,
{
    async fn handle_event(
        &self,
        event: ApplyDatabaseMigrations,
    ) -> Result<HandleOutcome, HandlerError> {
        if event.database_name != self.database.as_str() {
            debug!(
                database = %event.database_name,
                owned = %self.database,
                "migration request for another service; ignoring"
            );
            return Ok(HandleOutcome::Ignored);
        }

        let executor = &self.executor;
        let lock = self.lock.as_deref();
        let database = &self.database;

        self.coordinator
            .run(event, &self.bus, retry_context, |ev| async move {
                let scope = MigrationScope::new(TenantContext::from(ev.tenant_id), database.clone());

                with_scope_lock(lock, &scope, || executor.migrate_schema(&scope)).await?;
                Ok::<(), MigrationError>(())
            })
            .await
    }
}
