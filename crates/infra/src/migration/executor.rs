use std::sync::Arc;

use tracing::{debug, info};

use crate::tenancy::{MigrationScope, TenantResolver};
use crate::uow::{UnitOfWorkManager, UnitOfWorkOptions};

use super::MigrationError;

/// Brings one (tenant, database) scope up to date.
///
/// ```text
/// scope
///   ↓
/// 1. Tenant gate (skipped for host): does the tenant own this database?
///   ↓
/// 2. Begin unit of work (requires_new, non-transactional)
///   ↓
/// 3. Schema handle → pending migrations (empty → done, nothing written)
///   ↓
/// 4. Apply all pending as one operation
///   ↓
/// 5. Complete the unit of work (applied or not)
/// ```
///
/// Errors propagate unchanged. Retrying is the caller's job, and so is locking:
/// no lock is taken here.
#[derive(Clone)]
pub struct MigrationExecutor {
    unit_of_work: Arc<dyn UnitOfWorkManager>,
    resolver: TenantResolver,
}

impl MigrationExecutor {
    pub fn new(unit_of_work: Arc<dyn UnitOfWorkManager>, resolver: TenantResolver) -> Self {
        Self {
            unit_of_work,
            resolver,
        }
    }

    /// Returns whether any migration was applied.
    pub async fn migrate_schema(&self, scope: &MigrationScope) -> Result<bool, MigrationError> {
        if let Some(tenant_id) = scope.tenant_id() {
            if !self.resolver.has_database(tenant_id, scope.database()).await? {
                debug!(
                    tenant_id = %tenant_id,
                    database = %scope.database(),
                    "tenant shares the host database; skipping"
                );
                return Ok(false);
            }
        }

        let mut uow = self
            .unit_of_work
            .begin(scope, UnitOfWorkOptions::schema_migration())
            .await?;

        let schema = uow.schema();
        let pending = schema.pending_migrations().await?;

        let applied = if pending.is_empty() {
            debug!(
                tenant_id = %scope.context().label(),
                database = %scope.database(),
                "schema up to date"
            );
            false
        } else {
            info!(
                tenant_id = %scope.context().label(),
                database = %scope.database(),
                pending = pending.len(),
                first = %pending[0],
                "applying pending migrations"
            );
            schema.apply().await?;
            true
        };

        uow.complete().await?;

        if applied {
            info!(
                tenant_id = %scope.context().label(),
                database = %scope.database(),
                unit_of_work = uow.id(),
                "migrations applied"
            );
        }

        Ok(applied)
    }
}

impl core::fmt::Debug for MigrationExecutor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MigrationExecutor").finish_non_exhaustive()
    }
}
