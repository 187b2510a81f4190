//! Infrastructure event bus implementations.
//!
//! The bus abstraction and the in-memory bus live in `fleetmig-events`.
//! This module provides broker-backed implementations (e.g. Redis).

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisPubSubEventBus};
