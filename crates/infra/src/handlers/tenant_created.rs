use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use fleetmig_core::DatabaseName;
use fleetmig_events::{EventBus, TenantCreated};

use super::{EventHandler, HandlerError, with_scope_lock};
use crate::lock::MigrationLock;
use crate::migration::{DataSeeder, MigrationError, MigrationExecutor};
use crate::retry::{EventRetryCoordinator, HandleOutcome, RetryContext};
use crate::tenancy::{MigrationScope, TenantContext};

/// Prepares a freshly created tenant: migrate its own database (if it has one),
/// then seed its initial data from the event properties.
pub struct TenantCreatedHandler<B> {
    database: DatabaseName,
    executor: MigrationExecutor,
    seeder: Arc<dyn DataSeeder>,
    coordinator: EventRetryCoordinator,
    bus: B,
    lock: Option<Arc<dyn MigrationLock>>,
}

impl<B> TenantCreatedHandler<B>
where
    B: EventBus<TenantCreated>,
{
    pub fn new(
        database: DatabaseName,
        executor: MigrationExecutor,
        seeder: Arc<dyn DataSeeder>,
        coordinator: EventRetryCoordinator,
        bus: B,
    ) -> Self {
        Self {
            database,
            executor,
            seeder,
            coordinator,
            bus,
            lock: None,
        }
    }

    pub fn with_lock(mut self, lock: Arc<dyn MigrationLock>) -> Self {
        self.lock = Some(lock);
        self
    }
}

fn retry_context(event: &TenantCreated) -> RetryContext {
    RetryContext::new(Some(event.id), format!("tenant={}", event.name))
}

#[async_trait]
impl<B> EventHandler<TenantCreated> for TenantCreatedHandler<B>
where
    B: EventBus<TenantCreated>,
{
    async fn handle_event(&self, event: TenantCreated) -> Result<HandleOutcome, HandlerError> {
        let executor = &self.executor;
        let seeder = &self.seeder;
        let lock = self.lock.as_deref();
        let database = &self.database;

        self.coordinator
            .run(event, &self.bus, retry_context, |ev| async move {
                let context = TenantContext::tenant(ev.id);
                let scope = MigrationScope::new(context, database.clone());

                let applied =
                    with_scope_lock(lock, &scope, || executor.migrate_schema(&scope)).await?;
                seeder.seed(context, &ev.properties).await?;

                info!(
                    tenant_id = %ev.id,
                    tenant = %ev.name,
                    database = %database,
                    applied,
                    "tenant prepared"
                );
                Ok::<(), MigrationError>(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::RecordingDataSeeder;
    use crate::schema::InMemorySchemaState;
    use crate::tenancy::{InMemoryTenantStore, TenantRecord, TenantResolver};
    use crate::uow::InMemoryUnitOfWorkManager;
    use fleetmig_core::TenantId;
    use fleetmig_events::{InMemoryEventBus, try_count};

    type Bus = Arc<InMemoryEventBus<TenantCreated>>;

    struct Fixture {
        tenants: Arc<InMemoryTenantStore>,
        schema: Arc<InMemorySchemaState>,
        seeder: Arc<RecordingDataSeeder>,
        bus: Bus,
        handler: TenantCreatedHandler<Bus>,
    }

    fn setup() -> Fixture {
        let tenants = Arc::new(InMemoryTenantStore::new());
        let schema = Arc::new(InMemorySchemaState::new());
        let uow = Arc::new(InMemoryUnitOfWorkManager::new(schema.clone()));
        let seeder = Arc::new(RecordingDataSeeder::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let handler = TenantCreatedHandler::new(
            DatabaseName::new("Identity").unwrap(),
            MigrationExecutor::new(uow, TenantResolver::new(tenants.clone())),
            seeder.clone(),
            EventRetryCoordinator::default(),
            bus.clone(),
        );
        Fixture {
            tenants,
            schema,
            seeder,
            bus,
            handler,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dedicated_tenant_is_migrated_then_seeded() {
        let f = setup();
        let id = TenantId::new();
        f.tenants
            .upsert(TenantRecord::new(id, "acme").with_default_connection_string("Host=acme"));
        let scope = MigrationScope::tenant(id, DatabaseName::new("Identity").unwrap());
        f.schema.add_pending(&scope, ["001_users"]);

        let event = TenantCreated::new(id, "acme").with_property("AdminEmail", "admin@acme.test");
        let outcome = f.handler.handle_event(event).await.unwrap();

        assert_eq!(outcome, HandleOutcome::Completed);
        assert_eq!(f.schema.applied(&scope).len(), 1);
        let calls = f.seeder.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Some(id));
        assert_eq!(
            calls[0].1.get("AdminEmail").map(String::as_str),
            Some("admin@acme.test")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shared_tenant_is_seeded_without_migration() {
        let f = setup();
        let id = TenantId::new();
        f.tenants.upsert(TenantRecord::new(id, "acme"));

        let outcome = f.handler.handle_event(TenantCreated::new(id, "acme")).await.unwrap();

        assert_eq!(outcome, HandleOutcome::Completed);
        assert_eq!(f.schema.total_pending_queries(), 0);
        assert_eq!(f.seeder.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn seeding_failure_republishes_tenant_event() {
        let f = setup();
        let mut sub = f.bus.subscribe();
        let id = TenantId::new();
        f.tenants.upsert(TenantRecord::new(id, "acme"));
        f.seeder.fail_next(1);

        let outcome = f.handler.handle_event(TenantCreated::new(id, "acme")).await.unwrap();

        assert_eq!(outcome, HandleOutcome::Republished { try_count: 1 });
        let retried = sub.try_recv().unwrap();
        assert_eq!(retried.id, id);
        assert_eq!(try_count(&retried).unwrap(), 1);

        // Redelivery succeeds.
        let outcome = f.handler.handle_event(retried).await.unwrap();
        assert_eq!(outcome, HandleOutcome::Completed);
        assert_eq!(f.seeder.calls().len(), 1);
    }
}
