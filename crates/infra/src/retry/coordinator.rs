use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use fleetmig_core::TenantId;
use fleetmig_events::{Event, EventBus, HasProperties, MAX_TRY_COUNT, increment_try_count};

use super::error::{HandlerError, RetryableError};

/// Bounded retry budget with a uniformly jittered republish delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts allowed before the event is dropped.
    pub max_try_count: u32,
    /// Inclusive lower bound of the republish delay.
    pub min_delay: Duration,
    /// Exclusive upper bound of the republish delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_try_count: MAX_TRY_COUNT,
            min_delay: Duration::from_millis(5_000),
            max_delay: Duration::from_millis(15_000),
        }
    }
}

impl RetryPolicy {
    /// Random delay in `[min_delay, max_delay)`, whole milliseconds.
    ///
    /// Spreads republications when many tenants fail at once.
    pub fn next_delay(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        if max <= min {
            return self.min_delay;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..max))
    }

    pub fn allows(&self, try_count: u32) -> bool {
        try_count <= self.max_try_count
    }
}

/// Structured fields identifying what failed, for retry/abandon logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    pub tenant_id: Option<TenantId>,
    /// Entity the event is about, e.g. `database=Catalog` or `tenant=acme`.
    pub subject: String,
}

impl RetryContext {
    pub fn new(tenant_id: Option<TenantId>, subject: impl Into<String>) -> Self {
        Self {
            tenant_id,
            subject: subject.into(),
        }
    }

    fn tenant_label(&self) -> String {
        self.tenant_id
            .map(|t| t.to_string())
            .unwrap_or_else(|| "host".to_string())
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The operation succeeded.
    Completed,
    /// The event was not meant for this service.
    Ignored,
    /// The operation failed; the event went back on the bus with this count.
    Republished { try_count: u32 },
    /// The operation failed and the budget is spent; the event was dropped.
    Abandoned { try_count: u32 },
}

/// Generic retry wrapper shared by every event handler.
///
/// Parameterized per call by the operation, a context extractor for logs, and
/// the bus the event is republished to.
#[derive(Debug, Clone, Default)]
pub struct EventRetryCoordinator {
    policy: RetryPolicy,
}

impl EventRetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation`; on a retryable failure, hand the event to [`Self::handle_failure`].
    ///
    /// Resolution failures (unknown tenant, malformed input) are returned as
    /// errors untouched.
    pub async fn run<E, B, X, F, Fut, R>(
        &self,
        event: E,
        target: &B,
        extract: X,
        operation: F,
    ) -> Result<HandleOutcome, HandlerError>
    where
        E: Event + HasProperties,
        B: EventBus<E> + ?Sized,
        X: Fn(&E) -> RetryContext,
        F: FnOnce(E) -> Fut,
        Fut: Future<Output = Result<(), R>>,
        R: RetryableError,
    {
        match operation(event.clone()).await {
            Ok(()) => Ok(HandleOutcome::Completed),
            Err(err) if err.is_resolution_failure() => Err(HandlerError::Resolution(Box::new(err))),
            Err(err) => self.handle_failure(event, err, target, extract).await,
        }
    }

    /// Increment the try count, then republish after a jittered delay or abandon.
    pub async fn handle_failure<E, B, X, D>(
        &self,
        mut event: E,
        failure: D,
        target: &B,
        extract: X,
    ) -> Result<HandleOutcome, HandlerError>
    where
        E: Event + HasProperties,
        B: EventBus<E> + ?Sized,
        X: Fn(&E) -> RetryContext,
        D: core::fmt::Display,
    {
        let try_count = increment_try_count(&mut event)?;
        let ctx = extract(&event);

        if !self.policy.allows(try_count) {
            error!(
                event_type = event.event_type(),
                tenant_id = %ctx.tenant_label(),
                subject = %ctx.subject,
                try_count,
                max_try_count = self.policy.max_try_count,
                error = %failure,
                "retry budget exhausted; dropping event"
            );
            return Ok(HandleOutcome::Abandoned { try_count });
        }

        let delay = self.policy.next_delay();
        warn!(
            event_type = event.event_type(),
            tenant_id = %ctx.tenant_label(),
            subject = %ctx.subject,
            try_count,
            max_try_count = self.policy.max_try_count,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "event handling failed; republishing after delay"
        );

        tokio::time::sleep(delay).await;

        target
            .publish(event)
            .await
            .map_err(|e| HandlerError::Publish(e.to_string()))?;

        Ok(HandleOutcome::Republished { try_count })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use tracing::Level;
    use tracing::field::{Field, Visit};
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    use super::*;
    use crate::migration::MigrationError;
    use crate::schema::SchemaError;
    use crate::tenancy::TenantStoreError;
    use fleetmig_events::{
        ApplyDatabaseMigrations, InMemoryEventBus, TRY_COUNT_KEY, try_count,
    };

    type Bus = Arc<InMemoryEventBus<ApplyDatabaseMigrations>>;

    fn ctx(ev: &ApplyDatabaseMigrations) -> RetryContext {
        RetryContext::new(ev.tenant_id, format!("database={}", ev.database_name))
    }

    fn transient() -> MigrationError {
        MigrationError::Schema(SchemaError::Unavailable("connection refused".into()))
    }

    /// Log events recorded by [`Capture`]: level plus stringified fields.
    #[derive(Debug, Clone)]
    struct Captured {
        level: Level,
        fields: BTreeMap<String, String>,
    }

    impl Captured {
        fn field(&self, name: &str) -> Option<&str> {
            self.fields.get(name).map(String::as_str)
        }
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<Captured>>>);

    impl Capture {
        fn at(&self, level: Level) -> Vec<Captured> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.level == level)
                .cloned()
                .collect()
        }
    }

    struct Fields<'a>(&'a mut BTreeMap<String, String>);

    impl Visit for Fields<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn core::fmt::Debug) {
            self.0.insert(field.name().to_string(), format!("{value:?}"));
        }

        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.insert(field.name().to_string(), value.to_string());
        }

        fn record_u64(&mut self, field: &Field, value: u64) {
            self.0.insert(field.name().to_string(), value.to_string());
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for Capture {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut fields = BTreeMap::new();
            event.record(&mut Fields(&mut fields));
            self.0.lock().unwrap().push(Captured {
                level: *event.metadata().level(),
                fields,
            });
        }
    }

    fn capture_logs() -> (Capture, tracing::subscriber::DefaultGuard) {
        let capture = Capture::default();
        let guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));
        (capture, guard)
    }

    #[derive(Debug, thiserror::Error)]
    enum ImportError {
        #[error("payload is not a tenant export")]
        BadPayload,
        #[error("export store offline")]
        Offline,
    }

    impl RetryableError for ImportError {
        fn is_resolution_failure(&self) -> bool {
            matches!(self, ImportError::BadPayload)
        }
    }

    #[test]
    fn default_policy_matches_fleet_contract() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_try_count, 3);
        assert!(policy.allows(3));
        assert!(!policy.allows(4));
    }

    #[test]
    fn delays_stay_within_jitter_window() {
        let policy = RetryPolicy::default();
        for _ in 0..1_000 {
            let d = policy.next_delay();
            assert!(d >= Duration::from_millis(5_000));
            assert!(d < Duration::from_millis(15_000));
        }
    }

    #[test]
    fn degenerate_window_uses_min_delay() {
        let policy = RetryPolicy {
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.next_delay(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn success_does_not_touch_the_event_or_bus() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();
        let coordinator = EventRetryCoordinator::default();

        let outcome = coordinator
            .run(ApplyDatabaseMigrations::for_host("Catalog"), &bus, ctx, |_ev| async {
                Ok::<(), MigrationError>(())
            })
            .await
            .unwrap();

        assert_eq!(outcome, HandleOutcome::Completed);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_at_two_republishes_once_with_three() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();
        let coordinator = EventRetryCoordinator::default();
        let event =
            ApplyDatabaseMigrations::for_host("Catalog").with_property(TRY_COUNT_KEY, "2");

        let started = tokio::time::Instant::now();
        let outcome = coordinator
            .run(event, &bus, ctx, |_ev| async { Err(transient()) })
            .await
            .unwrap();

        assert_eq!(outcome, HandleOutcome::Republished { try_count: 3 });
        assert!(started.elapsed() >= Duration::from_millis(5_000));

        let republished = sub.try_recv().expect("event republished");
        assert_eq!(try_count(&republished).unwrap(), 3);
        assert_eq!(republished.database_name, "Catalog");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_at_three_abandons_without_publishing() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();
        let coordinator = EventRetryCoordinator::default();
        let event = ApplyDatabaseMigrations::for_tenant(fleetmig_core::TenantId::new(), "Basket")
            .with_property(TRY_COUNT_KEY, "3");

        let outcome = coordinator
            .run(event, &bus, ctx, |_ev| async { Err(transient()) })
            .await
            .unwrap();

        assert_eq!(outcome, HandleOutcome::Abandoned { try_count: 4 });
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn resolution_failures_are_not_retried() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();
        let coordinator = EventRetryCoordinator::default();
        let tenant = fleetmig_core::TenantId::new();

        let err = coordinator
            .run(ApplyDatabaseMigrations::for_tenant(tenant, "Basket"), &bus, ctx, |_ev| async move {
                Err(MigrationError::Tenant(TenantStoreError::NotFound(tenant)))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Resolution(_)));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_try_count_propagates() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let coordinator = EventRetryCoordinator::default();
        let event =
            ApplyDatabaseMigrations::for_host("Catalog").with_property(TRY_COUNT_KEY, "lots");

        let err = coordinator
            .run(event, &bus, ctx, |_ev| async { Err(transient()) })
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::RetryCount(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn redelivery_loop_stops_after_budget() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();
        let coordinator = EventRetryCoordinator::default();
        let attempts = Arc::new(AtomicU32::new(0));

        let mut event = ApplyDatabaseMigrations::for_host("Catalog");
        let mut outcomes = Vec::new();
        loop {
            let attempts = attempts.clone();
            let outcome = coordinator
                .run(event, &bus, ctx, |_ev| async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                })
                .await
                .unwrap();
            outcomes.push(outcome);

            match sub.try_recv() {
                Some(next) => event = next,
                None => break,
            }
        }

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(
            outcomes,
            vec![
                HandleOutcome::Republished { try_count: 1 },
                HandleOutcome::Republished { try_count: 2 },
                HandleOutcome::Republished { try_count: 3 },
                HandleOutcome::Abandoned { try_count: 4 },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_logs_a_warning_with_tenant_context() {
        let (logs, _guard) = capture_logs();
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let tenant = fleetmig_core::TenantId::new();

        coordinator_run_failing(&bus, ApplyDatabaseMigrations::for_tenant(tenant, "Basket")).await;

        let warns = logs.at(Level::WARN);
        assert_eq!(warns.len(), 1);
        let tenant_label = tenant.to_string();
        assert_eq!(warns[0].field("tenant_id"), Some(tenant_label.as_str()));
        assert_eq!(warns[0].field("subject"), Some("database=Basket"));
        assert_eq!(warns[0].field("try_count"), Some("1"));
        assert!(logs.at(Level::ERROR).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abandonment_logs_an_error_with_final_count() {
        let (logs, _guard) = capture_logs();
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let tenant = fleetmig_core::TenantId::new();
        let event = ApplyDatabaseMigrations::for_tenant(tenant, "Basket").with_property(TRY_COUNT_KEY, "3");

        coordinator_run_failing(&bus, event).await;

        let errors = logs.at(Level::ERROR);
        assert_eq!(errors.len(), 1);
        let tenant_label = tenant.to_string();
        assert_eq!(errors[0].field("tenant_id"), Some(tenant_label.as_str()));
        assert_eq!(errors[0].field("subject"), Some("database=Basket"));
        assert_eq!(errors[0].field("try_count"), Some("4"));
        assert!(logs.at(Level::WARN).is_empty());
    }

    async fn coordinator_run_failing(bus: &Bus, event: ApplyDatabaseMigrations) -> HandleOutcome {
        EventRetryCoordinator::default()
            .run(event, bus, ctx, |_ev| async { Err(transient()) })
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn any_classified_error_type_can_drive_the_coordinator() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();
        let coordinator = EventRetryCoordinator::default();

        let outcome = coordinator
            .run(ApplyDatabaseMigrations::for_host("Catalog"), &bus, ctx, |_ev| async {
                Err(ImportError::Offline)
            })
            .await
            .unwrap();
        assert_eq!(outcome, HandleOutcome::Republished { try_count: 1 });
        assert!(sub.try_recv().is_some());

        let err = coordinator
            .run(ApplyDatabaseMigrations::for_host("Catalog"), &bus, ctx, |_ev| async {
                Err(ImportError::BadPayload)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Resolution(_)));
        assert_eq!(
            err.to_string(),
            "event cannot be resolved: payload is not a tenant export"
        );
        assert!(sub.try_recv().is_none());
    }
}
