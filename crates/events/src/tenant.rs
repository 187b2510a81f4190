use fleetmig_core::TenantId;

/// Helper trait for tenant-scoped messages.
///
/// `None` means the message targets the host (shared) side of the fleet rather
/// than a specific tenant. Workers use this to filter deliveries and handlers use
/// it to label logs.
pub trait TenantScoped {
    fn tenant_id(&self) -> Option<TenantId>;
}
