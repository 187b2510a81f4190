use std::sync::Arc;

use anyhow::{Context, anyhow};
use tracing::{info, warn};

use fleetmig_events::{
    ApplyDatabaseMigrations, EventBus, InMemoryEventBus, TenantConnectionStringUpdated,
    TenantCreated,
};
use fleetmig_infra::migration::NoopDataSeeder;
use fleetmig_infra::schema::{InMemorySchemaState, PostgresUnitOfWorkManager};
use fleetmig_infra::uow::InMemoryUnitOfWorkManager;
use fleetmig_infra::{
    ApplyDatabaseMigrationsHandler, EventRetryCoordinator, EventWorker, InMemoryMigrationLock,
    InMemoryTenantStore, MigrationConfig, MigrationExecutor, MigrationLock,
    TenantConnectionStringUpdatedHandler, TenantCreatedHandler, TenantResolver, UnitOfWorkManager,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fleetmig_observability::init("fleetmig-worker");

    let config = MigrationConfig::from_env().context("invalid configuration")?;
    info!(
        database = %config.database_name,
        max_try_count = config.retry.max_try_count,
        "starting migration worker"
    );

    let uow = unit_of_work_manager(&config).await?;

    #[cfg(feature = "redis")]
    if let Ok(redis_url) = std::env::var("REDIS_URL") {
        use fleetmig_infra::event_bus::RedisPubSubEventBus;

        let apply = Arc::new(RedisPubSubEventBus::new(&redis_url, "fleetmig.migrations.database.apply")?);
        let created = Arc::new(RedisPubSubEventBus::new(&redis_url, "fleetmig.tenancy.tenant.created")?);
        let updated = Arc::new(RedisPubSubEventBus::new(
            &redis_url,
            "fleetmig.tenancy.tenant.connection_string_updated",
        )?);
        return run(config, uow, apply, created, updated).await;
    }

    run(
        config,
        uow,
        Arc::new(InMemoryEventBus::<ApplyDatabaseMigrations>::new()),
        Arc::new(InMemoryEventBus::<TenantCreated>::new()),
        Arc::new(InMemoryEventBus::<TenantConnectionStringUpdated>::new()),
    )
    .await
}

async fn unit_of_work_manager(config: &MigrationConfig) -> anyhow::Result<Arc<dyn UnitOfWorkManager>> {
    match (&config.database_url, &config.migrations_dir) {
        (Some(url), Some(dir)) => {
            let manager = PostgresUnitOfWorkManager::connect(url, dir)
                .await
                .context("failed to prepare Postgres schema runner")?;
            Ok(Arc::new(manager))
        }
        _ => {
            warn!("DATABASE_URL or FLEETMIG_MIGRATIONS_DIR not set; using in-memory schema state");
            Ok(Arc::new(InMemoryUnitOfWorkManager::new(Arc::new(
                InMemorySchemaState::new(),
            ))))
        }
    }
}

async fn run<A, C, U>(
    config: MigrationConfig,
    uow: Arc<dyn UnitOfWorkManager>,
    apply_bus: Arc<A>,
    created_bus: Arc<C>,
    updated_bus: Arc<U>,
) -> anyhow::Result<()>
where
    A: EventBus<ApplyDatabaseMigrations> + 'static,
    C: EventBus<TenantCreated> + 'static,
    U: EventBus<TenantConnectionStringUpdated> + 'static,
{
    let tenants = Arc::new(InMemoryTenantStore::new());
    let lock: Arc<dyn MigrationLock> = Arc::new(InMemoryMigrationLock::new());
    let coordinator = EventRetryCoordinator::new(config.retry.clone());
    let executor = || MigrationExecutor::new(uow.clone(), TenantResolver::new(tenants.clone()));

    let apply_handler = ApplyDatabaseMigrationsHandler::new(
        config.database_name.clone(),
        executor(),
        coordinator.clone(),
        apply_bus.clone(),
    )
    .with_lock(lock.clone());
    let created_handler = TenantCreatedHandler::new(
        config.database_name.clone(),
        executor(),
        Arc::new(NoopDataSeeder),
        coordinator.clone(),
        created_bus.clone(),
    )
    .with_lock(lock.clone());
    let updated_handler = TenantConnectionStringUpdatedHandler::new(
        config.database_name.clone(),
        executor(),
        coordinator,
        updated_bus.clone(),
    )
    .with_lock(lock);

    let workers = vec![
        EventWorker::spawn("apply-migrations", &apply_bus, None, Arc::new(apply_handler)),
        EventWorker::spawn("tenant-created", &created_bus, None, Arc::new(created_handler)),
        EventWorker::spawn(
            "tenant-connection-string-updated",
            &updated_bus,
            None,
            Arc::new(updated_handler),
        ),
    ];

    // Migrate the host database on startup. Workers are subscribed once `spawn` returns.
    apply_bus
        .publish(ApplyDatabaseMigrations::for_host(config.database_name.as_str()))
        .await
        .map_err(|e| anyhow!("failed to publish startup migration request: {e}"))?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested; draining workers");

    for worker in workers {
        worker.shutdown().await;
    }
    info!("migration worker stopped");
    Ok(())
}
