//! Distributed events exchanged by the migration fleet, plus bus mechanics.

pub mod bus;
pub mod event;
pub mod etos;
pub mod in_memory_bus;
pub mod retry_count;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use etos::{ApplyDatabaseMigrations, TenantConnectionStringUpdated, TenantCreated};
pub use event::{Event, HasProperties, Properties};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use retry_count::{
    MAX_TRY_COUNT, RetryCountError, TRY_COUNT_KEY, increment_try_count, set_try_count, try_count,
};
pub use tenant::TenantScoped;
