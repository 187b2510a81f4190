use fleetmig_core::{DatabaseName, TenantId};

/// Which side of the fleet data access is scoped to.
///
/// This is an explicit value threaded through every call that needs tenant
/// scoping; there is no process-wide "current tenant". Switching tenants
/// produces a new value and leaves the caller's context untouched, so the
/// previous context is back in effect as soon as the callee returns, on every
/// exit path.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct TenantContext {
    tenant_id: Option<TenantId>,
}

impl TenantContext {
    /// The host (shared) database context.
    pub fn host() -> Self {
        Self { tenant_id: None }
    }

    pub fn tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
        }
    }

    /// Enter another tenant's context.
    pub fn change(&self, tenant_id: Option<TenantId>) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_host(&self) -> bool {
        self.tenant_id.is_none()
    }

    /// Stable label for logs and lock keys.
    pub fn label(&self) -> String {
        match self.tenant_id {
            Some(id) => id.to_string(),
            None => "host".to_string(),
        }
    }
}

impl From<Option<TenantId>> for TenantContext {
    fn from(tenant_id: Option<TenantId>) -> Self {
        Self { tenant_id }
    }
}

/// Target of one migration attempt: a tenant context plus a logical database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MigrationScope {
    context: TenantContext,
    database: DatabaseName,
}

impl MigrationScope {
    pub fn new(context: TenantContext, database: DatabaseName) -> Self {
        Self { context, database }
    }

    pub fn host(database: DatabaseName) -> Self {
        Self::new(TenantContext::host(), database)
    }

    pub fn tenant(tenant_id: TenantId, database: DatabaseName) -> Self {
        Self::new(TenantContext::tenant(tenant_id), database)
    }

    pub fn context(&self) -> TenantContext {
        self.context
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.context.tenant_id()
    }

    pub fn database(&self) -> &DatabaseName {
        &self.database
    }

    /// Key callers use to serialize work on the same (tenant, database) pair.
    pub fn lock_key(&self) -> String {
        format!("migrations:{}:{}", self.context.label(), self.database)
    }
}
