use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use fleetmig_core::DatabaseName;
use fleetmig_events::{EventBus, TenantConnectionStringUpdated};

use super::{EventHandler, HandlerError, with_scope_lock};
use crate::lock::MigrationLock;
use crate::migration::{MigrationError, MigrationExecutor};
use crate::retry::{EventRetryCoordinator, HandleOutcome, RetryContext};
use crate::tenancy::MigrationScope;

/// Re-migrates a tenant when the connection string this service reads changed
/// (its own database's override, or the tenant default).
pub struct TenantConnectionStringUpdatedHandler<B> {
    database: DatabaseName,
    executor: MigrationExecutor,
    coordinator: EventRetryCoordinator,
    bus: B,
    lock: Option<Arc<dyn MigrationLock>>,
}

impl<B> TenantConnectionStringUpdatedHandler<B>
where
    B: EventBus<TenantConnectionStringUpdated>,
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

    pub fn with_lock(mut self, lock: Arc<dyn MigrationLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    fn concerns_this_service(&self, event: &TenantConnectionStringUpdated) -> bool {
        match event.connection_string_name.as_deref() {
            None => true,
            Some(name) => name == DatabaseName::DEFAULT || name == self.database.as_str(),
        }
    }
}

fn retry_context(event: &TenantConnectionStringUpdated) -> RetryContext {
    let subject = match &event.connection_string_name {
        Some(cs) => format!("tenant={} connection_string={cs}", event.name),
        None => format!("tenant={}", event.name),
    };
    RetryContext::new(Some(event.id), subject)
}

#[async_trait]
impl<B> EventHandler<TenantConnectionStringUpdated> for TenantConnectionStringUpdatedHandler<B>
where
    B: EventBus<TenantConnectionStringUpdated>,
{
    async fn handle_event(
        &self,
        event: TenantConnectionStringUpdated,
    ) -> Result<HandleOutcome, HandlerError> {
        if !self.concerns_this_service(&event) {
            debug!(
                tenant_id = %event.id,
                connection_string = ?event.connection_string_name,
                "connection string not used by this service; ignoring"
            );
            return Ok(HandleOutcome::Ignored);
        }

        let executor = &self.executor;
        let lock = self.lock.as_deref();
        let scope = MigrationScope::tenant(event.id, self.database.clone());
        let scope = &scope;

        self.coordinator
            .run(event, &self.bus, retry_context, |_ev| async move {
                with_scope_lock(lock, scope, || executor.migrate_schema(scope)).await?;
                Ok::<(), MigrationError>(())
            })
            .await
    }
}
