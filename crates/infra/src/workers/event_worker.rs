use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use fleetmig_core::TenantId;
use fleetmig_events::{EventBus, Subscription, TenantScoped};

use crate::handlers::EventHandler;
use crate::retry::HandleOutcome;

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop taking new deliveries and wait for in-flight ones to finish
    /// (including any pending retry delays).
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                error!(worker = self.name, error = %err, "worker task ended abnormally");
            }
        }
    }
}

/// Subscribes a handler to a bus.
///
/// - One task per delivery, so a retry sleeping out its delay does not hold up
///   the rest of the stream
/// - `tenant_id`: when provided, deliveries for other tenants (and the host) are skipped
/// - Errors escaping the handler are logged; the delivery is then dropped
#[derive(Debug)]
pub struct EventWorker;

impl EventWorker {
    pub fn spawn<M, B, H>(
        name: &'static str,
        bus: &B,
        tenant_id: Option<TenantId>,
        handler: Arc<H>,
    ) -> WorkerHandle
    where
        M: TenantScoped + Send + 'static,
        B: EventBus<M> + ?Sized,
        H: EventHandler<M> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let sub = bus.subscribe();

        let join = tokio::spawn(worker_loop(name, sub, shutdown_rx, tenant_id, handler));

        WorkerHandle {
            name,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }
}

async fn worker_loop<M, H>(
    name: &'static str,
    mut sub: Subscription<M>,
    mut shutdown_rx: oneshot::Receiver<()>,
    tenant_id: Option<TenantId>,
    handler: Arc<H>,
) where
    M: TenantScoped + Send + 'static,
    H: EventHandler<M> + 'static,
{
    info!(worker = name, "worker started");
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            msg = sub.recv() => {
                let Some(msg) = msg else { break };

                if tenant_id.is_some() && msg.tenant_id() != tenant_id {
                    continue;
                }

                let handler = handler.clone();
                in_flight.spawn(async move { deliver(name, handler.as_ref(), msg).await });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                log_join(name, joined);
            }
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        log_join(name, joined);
    }
    info!(worker = name, "worker stopped");
}

async fn deliver<M, H>(name: &'static str, handler: &H, msg: M)
where
    H: EventHandler<M> + ?Sized,
{
    match handler.handle_event(msg).await {
        Ok(HandleOutcome::Completed) => debug!(worker = name, "event handled"),
        Ok(HandleOutcome::Ignored) => debug!(worker = name, "event ignored"),
        // Retry and abandon are logged by the coordinator.
        Ok(HandleOutcome::Republished { .. } | HandleOutcome::Abandoned { .. }) => {}
        Err(err) => error!(worker = name, error = %err, "event handler failed; delivery dropped"),
    }
}

fn log_join(name: &'static str, joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!(worker = name, error = %err, "delivery task panicked");
    }
}
