//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is the transport between services. It is intentionally lightweight:
//!
//! - **Transport-agnostic**: in-memory channels, brokers, streams
//! - **At-least-once delivery**: consumers must be idempotent
//! - **No ordering guarantees**: a republished retry may overtake unrelated events
//!
//! Retry state never lives in the bus. A consumer that wants another attempt
//! republishes the event with an incremented `TryCount` property.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

/// A subscription to an event stream.
///
/// Each subscription receives a copy of every message published after it was
/// created (broadcast semantics). Designed for a single consuming task.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Take a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<M> {
        self.receiver.try_recv().ok()
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// ```text
/// Publisher → Event Bus (publish) → Subscribers
///                  ↑                     │
///                  └── republish on failure (TryCount + 1)
/// ```
///
/// `publish()` can fail (broker unavailable, serialization). Failures are
/// surfaced to the caller; for a retry republish that means the event is lost
/// unless the surrounding infrastructure redelivers it.
#[async_trait]
pub trait EventBus<M: Send + 'static>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    async fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

#[async_trait]
impl<M, B> EventBus<M> for Arc<B>
where
    M: Send + 'static,
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    async fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message).await
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
