use std::sync::Arc;

use tracing::debug;

use fleetmig_core::{DatabaseName, TenantId};

use super::store::{TenantStore, TenantStoreError};

/// Decides whether a tenant owns a database for a logical database name.
///
/// Tenants that share the host database must not trigger per-tenant migration
/// work; the host migration already covers them.
#[derive(Clone)]
pub struct TenantResolver {
    store: Arc<dyn TenantStore>,
}

impl TenantResolver {
    pub fn new(store: Arc<dyn TenantStore>) -> Self {
        Self { store }
    }

    /// True iff the tenant's default connection string or its `database`
    /// override is non-blank. Unknown tenants propagate `NotFound`.
    pub async fn has_database(
        &self,
        tenant_id: TenantId,
        database: &DatabaseName,
    ) -> Result<bool, TenantStoreError> {
        let record = self.store.find(tenant_id).await?;
        let dedicated = record.has_dedicated_database(database);

        debug!(
            tenant_id = %tenant_id,
            database = %database,
            dedicated,
            "resolved tenant database presence"
        );

        Ok(dedicated)
    }
}

impl core::fmt::Debug for TenantResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TenantResolver").finish_non_exhaustive()
    }
}
