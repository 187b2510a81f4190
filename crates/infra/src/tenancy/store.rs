use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fleetmig_core::{DatabaseName, TenantId};

/// A tenant as seen from a migration service (read-only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: TenantId,
    pub name: String,
    /// Fallback connection string; blank means "uses the host database".
    pub default_connection_string: Option<String>,
    /// Per logical database overrides, keyed by database name.
    pub connection_strings: BTreeMap<String, String>,
}

impl TenantRecord {
    pub fn new(id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            default_connection_string: None,
            connection_strings: BTreeMap::new(),
        }
    }

    pub fn with_default_connection_string(mut self, value: impl Into<String>) -> Self {
        self.default_connection_string = Some(value.into());
        self
    }

    pub fn with_connection_string(
        mut self,
        database: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.connection_strings.insert(database.into(), value.into());
        self
    }

    pub fn connection_string(&self, database: &DatabaseName) -> Option<&str> {
        self.connection_strings
            .get(database.as_str())
            .map(String::as_str)
    }

    /// Whether the tenant owns a database for `database` instead of sharing the host's.
    pub fn has_dedicated_database(&self, database: &DatabaseName) -> bool {
        let non_blank = |s: Option<&str>| s.is_some_and(|v| !v.trim().is_empty());

        non_blank(self.default_connection_string.as_deref())
            || non_blank(self.connection_string(database))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenantStoreError {
    /// The tenant id does not resolve. Not retryable.
    #[error("tenant {0} not found")]
    NotFound(TenantId),

    /// The directory could not be reached. Retryable.
    #[error("tenant directory unavailable: {0}")]
    Unavailable(String),
}

/// Tenant directory lookup.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find(&self, tenant_id: TenantId) -> Result<TenantRecord, TenantStoreError>;
}

#[async_trait]
impl<S> TenantStore for Arc<S>
where
    S: TenantStore + ?Sized,
{
    async fn find(&self, tenant_id: TenantId) -> Result<TenantRecord, TenantStoreError> {
        (**self).find(tenant_id).await
    }
}

/// In-memory tenant directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTenantStore {
    inner: RwLock<HashMap<TenantId, TenantRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, record: TenantRecord) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(record.id, record);
        }
    }

    pub fn remove(&self, tenant_id: TenantId) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&tenant_id);
        }
    }

    /// Make every lookup fail with [`TenantStoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn find(&self, tenant_id: TenantId) -> Result<TenantRecord, TenantStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TenantStoreError::Unavailable("directory offline".to_string()));
        }

        let map = self
            .inner
            .read()
            .map_err(|_| TenantStoreError::Unavailable("lock poisoned".to_string()))?;

        map.get(&tenant_id)
            .cloned()
            .ok_or(TenantStoreError::NotFound(tenant_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(name: &str) -> DatabaseName {
        DatabaseName::new(name).unwrap()
    }

    #[test]
    fn default_connection_string_counts_for_every_database() {
        let record = TenantRecord::new(TenantId::new(), "acme")
            .with_default_connection_string("Host=acme-db;Database=acme");

        assert!(record.has_dedicated_database(&db("Catalog")));
        assert!(record.has_dedicated_database(&db("Basket")));
    }

    #[test]
    fn override_only_counts_for_its_database() {
        let record = TenantRecord::new(TenantId::new(), "acme")
            .with_connection_string("Basket", "Host=acme-basket");

        assert!(record.has_dedicated_database(&db("Basket")));
        assert!(!record.has_dedicated_database(&db("Catalog")));
    }

    #[test]
    fn blank_strings_mean_shared_host_database() {
        let record = TenantRecord::new(TenantId::new(), "acme")
            .with_default_connection_string("   ")
            .with_connection_string("Basket", "");

        assert!(!record.has_dedicated_database(&db("Basket")));
    }

    #[tokio::test]
    async fn find_reports_unknown_and_unavailable() {
        let store = InMemoryTenantStore::new();
        let id = TenantId::new();

        assert_eq!(store.find(id).await, Err(TenantStoreError::NotFound(id)));

        store.upsert(TenantRecord::new(id, "acme"));
        assert_eq!(store.find(id).await.unwrap().name, "acme");

        store.set_unavailable(true);
        assert!(matches!(
            store.find(id).await,
            Err(TenantStoreError::Unavailable(_))
        ));
    }
}
