//! Tenant context, tenant directory access, and database-presence resolution.

pub mod context;
pub mod resolver;
pub mod store;

pub use context::{MigrationScope, TenantContext};
pub use resolver::TenantResolver;
pub use store::{InMemoryTenantStore, TenantRecord, TenantStore, TenantStoreError};
