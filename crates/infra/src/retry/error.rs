use thiserror::Error;

use fleetmig_events::RetryCountError;

/// Operation errors the coordinator can classify.
pub trait RetryableError: std::error::Error + Send + Sync + 'static {
    /// True when the input itself is at fault (unknown tenant, malformed
    /// payload). Such failures are returned to the caller, never republished.
    fn is_resolution_failure(&self) -> bool;
}

/// Errors that escape a handler (never retried by the handler itself).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Unknown tenant or malformed event payload.
    #[error("event cannot be resolved: {0}")]
    Resolution(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The `TryCount` property is present but unreadable.
    #[error(transparent)]
    RetryCount(#[from] RetryCountError),

    /// The retry could not be put back on the bus; the event is lost.
    #[error("failed to republish event: {0}")]
    Publish(String),
}
