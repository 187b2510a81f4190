//! Postgres-backed schema runner built on `sqlx::migrate::Migrator`.
//!
//! Pending migrations are the migrator's up-migrations whose version is absent
//! from `_sqlx_migrations`. Listing them never writes; the bookkeeping table is
//! only created by `apply()`.
//!
//! ## Pools per scope
//!
//! Connection-string resolution is not done here. Callers register a pool for
//! each (tenant, database) pair that owns a database; every other scope uses the
//! host pool.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use fleetmig_core::MigrationId;

use super::{SchemaError, SchemaRunner};
use crate::tenancy::MigrationScope;
use crate::uow::{UnitOfWork, UnitOfWorkError, UnitOfWorkManager, UnitOfWorkOptions};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Schema runner for one Postgres database.
#[derive(Debug, Clone)]
pub struct PostgresSchemaRunner {
    pool: PgPool,
    migrator: Arc<Migrator>,
}

impl PostgresSchemaRunner {
    pub fn new(pool: PgPool, migrator: Arc<Migrator>) -> Self {
        Self { pool, migrator }
    }

    async fn applied_versions(&self) -> Result<HashSet<i64>, SchemaError> {
        let table_exists: bool =
            sqlx::query_scalar("SELECT to_regclass('_sqlx_migrations') IS NOT NULL")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| SchemaError::Unavailable(e.to_string()))?;

        if !table_exists {
            return Ok(HashSet::new());
        }

        let versions: Vec<i64> =
            sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| SchemaError::Query(e.to_string()))?;

        Ok(versions.into_iter().collect())
    }
}

#[async_trait]
impl SchemaRunner for PostgresSchemaRunner {
    async fn pending_migrations(&self) -> Result<Vec<MigrationId>, SchemaError> {
        let applied = self.applied_versions().await?;

        Ok(self
            .migrator
            .iter()
            .filter(|m| !m.migration_type.is_down_migration())
            .filter(|m| !applied.contains(&m.version))
            .map(|m| MigrationId::new(format!("{}_{}", m.version, m.description)))
            .collect())
    }

    async fn apply(&self) -> Result<(), SchemaError> {
        self.migrator
            .run(&self.pool)
            .await
            .map_err(|e| SchemaError::Apply(e.to_string()))
    }
}

/// Hands out non-transactional units of work over Postgres pools.
#[derive(Debug)]
pub struct PostgresUnitOfWorkManager {
    host: PgPool,
    tenant_pools: RwLock<HashMap<MigrationScope, PgPool>>,
    migrator: Arc<Migrator>,
    next_id: AtomicU64,
}

impl PostgresUnitOfWorkManager {
    pub fn new(host: PgPool, migrator: Arc<Migrator>) -> Self {
        Self {
            host,
            tenant_pools: RwLock::new(HashMap::new()),
            migrator,
            next_id: AtomicU64::new(1),
        }
    }

    /// Connect to the host database and load migrations from `migrations_dir`.
    pub async fn connect(
        database_url: &str,
        migrations_dir: &Path,
    ) -> Result<Self, SchemaError> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(database_url)
            .await
            .map_err(|e| SchemaError::Unavailable(e.to_string()))?;

        let migrator = Migrator::new(migrations_dir)
            .await
            .map_err(|e| SchemaError::Query(e.to_string()))?;

        info!(
            migrations = migrator.iter().count(),
            dir = %migrations_dir.display(),
            "loaded schema migrations"
        );

        Ok(Self::new(pool, Arc::new(migrator)))
    }

    /// Route `scope` to a dedicated pool instead of the host pool.
    pub fn register_pool(&self, scope: MigrationScope, pool: PgPool) {
        if let Ok(mut pools) = self.tenant_pools.write() {
            pools.insert(scope, pool);
        }
    }

    fn pool_for(&self, scope: &MigrationScope) -> PgPool {
        self.tenant_pools
            .read()
            .ok()
            .and_then(|pools| pools.get(scope).cloned())
            .unwrap_or_else(|| self.host.clone())
    }
}

#[async_trait]
impl UnitOfWorkManager for PostgresUnitOfWorkManager {
    async fn begin(
        &self,
        scope: &MigrationScope,
        options: UnitOfWorkOptions,
    ) -> Result<Box<dyn UnitOfWork>, UnitOfWorkError> {
        if options.is_transactional {
            return Err(UnitOfWorkError::Unsupported(
                "schema migrations cannot run inside a transaction".to_string(),
            ));
        }

        let runner = PostgresSchemaRunner::new(self.pool_for(scope), Arc::clone(&self.migrator));

        Ok(Box::new(PostgresUnitOfWork {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            scope: scope.clone(),
            options,
            runner: Arc::new(runner),
            completed: false,
        }))
    }
}

struct PostgresUnitOfWork {
    id: u64,
    scope: MigrationScope,
    options: UnitOfWorkOptions,
    runner: Arc<PostgresSchemaRunner>,
    completed: bool,
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    fn id(&self) -> u64 {
        self.id
    }

    fn scope(&self) -> &MigrationScope {
        &self.scope
    }

    fn options(&self) -> UnitOfWorkOptions {
        self.options
    }

    fn schema(&self) -> Arc<dyn SchemaRunner> {
        self.runner.clone()
    }

    // Non-transactional: statements already committed, nothing to flush.
    async fn complete(&mut self) -> Result<(), UnitOfWorkError> {
        if self.completed {
            return Err(UnitOfWorkError::AlreadyCompleted);
        }
        self.completed = true;
        Ok(())
    }
}
