//! Infrastructure layer: tenancy, units of work, schema runners, retry, handlers.

pub mod config;
pub mod event_bus;
pub mod handlers;
pub mod lock;
pub mod migration;
pub mod retry;
pub mod schema;
pub mod tenancy;
pub mod uow;
pub mod workers;


pub use config::{ConfigError, MigrationConfig};
pub use handlers::{
    ApplyDatabaseMigrationsHandler, EventHandler, HandlerError,
    TenantConnectionStringUpdatedHandler, TenantCreatedHandler,
};
pub use lock::{InMemoryMigrationLock, LockError, LockGuard, MigrationLock};
pub use migration::{DataSeeder, MigrationError, MigrationExecutor, SeedError};
pub use retry::{
    EventRetryCoordinator, HandleOutcome, RetryContext, RetryPolicy, RetryableError,
};
pub use schema::{SchemaError, SchemaRunner};
pub use tenancy::{
    InMemoryTenantStore, MigrationScope, TenantContext, TenantRecord, TenantResolver, TenantStore,
    TenantStoreError,
};
pub use uow::{UnitOfWork, UnitOfWorkError, UnitOfWorkManager, UnitOfWorkOptions};
pub use workers::{EventWorker, WorkerHandle};
