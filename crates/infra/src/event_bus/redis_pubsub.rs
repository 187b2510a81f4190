//! Redis pub/sub-backed event bus (optional).
//!
//! Redis pub/sub is not durable: messages published while a service is
//! offline are lost. Retries republish through the same channel, so a retry
//! can be lost the same way.

use std::marker::PhantomData;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use redis::Commands;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use fleetmig_events::{Event, EventBus, Subscription};

/// How long `subscribe` waits for Redis to confirm the subscription.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Reader wake-up interval, so a dropped subscription ends its thread.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum RedisBusError {
    #[error("redis error: {0}")]
    Redis(String),
    #[error("failed to serialize event: {0}")]
    Serialize(String),
    #[error("publish task failed: {0}")]
    Task(String),
}

/// Redis pub/sub bus carrying one event type as JSON on one channel.
#[derive(Debug)]
pub struct RedisPubSubEventBus<M> {
    client: redis::Client,
    channel: String,
    _marker: PhantomData<fn() -> M>,
}

impl<M> Clone for RedisPubSubEventBus<M> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            channel: self.channel.clone(),
            _marker: PhantomData,
        }
    }
}

impl<M> RedisPubSubEventBus<M> {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
            _marker: PhantomData,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl<M> EventBus<M> for RedisPubSubEventBus<M>
where
    M: Event + Serialize + DeserializeOwned,
{
    type Error = RedisBusError;

    async fn publish(&self, message: M) -> Result<(), Self::Error> {
        let payload =
            serde_json::to_string(&message).map_err(|e| RedisBusError::Serialize(e.to_string()))?;
        let client = self.client.clone();
        let channel = self.channel.clone();

        tokio::task::spawn_blocking(move || -> Result<(), RedisBusError> {
            let mut conn = client
                .get_connection()
                .map_err(|e| RedisBusError::Redis(e.to_string()))?;
            let _: i64 = conn
                .publish(&channel, payload)
                .map_err(|e| RedisBusError::Redis(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| RedisBusError::Task(e.to_string()))?
    }

    /// Blocks until Redis confirms the `SUBSCRIBE` (or it fails), so events
    /// published after this returns reach the subscription.
    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<bool>(1);

        let client = self.client.clone();
        let channel = self.channel.clone();

        // Blocking reader thread forwarding decoded events into the subscription.
        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(err) => {
                    warn!(channel = %channel, error = %err, "redis subscribe: connection failed");
                    let _ = ready_tx.send(false);
                    return;
                }
            };

            if let Err(err) = conn.set_read_timeout(Some(READ_TIMEOUT)) {
                warn!(channel = %channel, error = %err, "redis subscribe: cannot set read timeout");
                let _ = ready_tx.send(false);
                return;
            }

            let mut pubsub = conn.as_pubsub();
            if let Err(err) = pubsub.subscribe(&channel) {
                warn!(channel = %channel, error = %err, "redis subscribe failed");
                let _ = ready_tx.send(false);
                return;
            }
            let _ = ready_tx.send(true);

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(err) => match after_read_error(&err, &tx) {
                        ReadStep::Continue => continue,
                        ReadStep::Stop => {
                            if !tx.is_closed() {
                                warn!(channel = %channel, error = %err, "redis subscription closed");
                            }
                            return;
                        }
                    },
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let event: M = match serde_json::from_str(&payload) {
                    Ok(e) => e,
                    Err(err) => {
                        debug!(channel = %channel, error = %err, "skipping undecodable message");
                        continue;
                    }
                };

                if tx.send(event).is_err() {
                    return;
                }
            }
        });

        match ready_rx.recv_timeout(SUBSCRIBE_TIMEOUT) {
            Ok(true) => debug!(channel = %self.channel, "redis subscription ready"),
            Ok(false) | Err(_) => warn!(
                channel = %self.channel,
                "redis subscription not confirmed; events published meanwhile are lost"
            ),
        }

        Subscription::new(rx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadStep {
    Continue,
    Stop,
}

/// Read timeouts are wake-ups: keep reading while someone still listens.
fn after_read_error<M>(err: &redis::RedisError, tx: &mpsc::UnboundedSender<M>) -> ReadStep {
    if err.is_timeout() && !tx.is_closed() {
        ReadStep::Continue
    } else {
        ReadStep::Stop
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Instant;

    use super::*;
    use fleetmig_events::ApplyDatabaseMigrations;

    fn io_error(kind: io::ErrorKind) -> redis::RedisError {
        redis::RedisError::from(io::Error::new(kind, "socket"))
    }

    #[test]
    fn read_timeout_continues_only_while_subscribed() {
        let (tx, rx) = mpsc::unbounded_channel::<ApplyDatabaseMigrations>();
        let timeout = io_error(io::ErrorKind::TimedOut);

        assert_eq!(after_read_error(&timeout, &tx), ReadStep::Continue);
        drop(rx);
        assert_eq!(after_read_error(&timeout, &tx), ReadStep::Stop);
    }

    #[test]
    fn connection_errors_stop_the_reader() {
        let (tx, _rx) = mpsc::unbounded_channel::<ApplyDatabaseMigrations>();
        let reset = io_error(io::ErrorKind::ConnectionReset);

        assert_eq!(after_read_error(&reset, &tx), ReadStep::Stop);
    }

    #[tokio::test]
    async fn subscribe_waits_for_the_reader_to_report() {
        // Nothing listens on port 1; the reader reports failure straight away.
        let bus =
            RedisPubSubEventBus::<ApplyDatabaseMigrations>::new("redis://127.0.0.1:1/", "fleetmig.test")
                .unwrap();

        let started = Instant::now();
        let mut sub = bus.subscribe();

        assert!(started.elapsed() < SUBSCRIBE_TIMEOUT);
        assert!(sub.recv().await.is_none());
    }
}
