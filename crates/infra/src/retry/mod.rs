//! At-least-once retry for event handlers.
//!
//! Retry state lives in the event (`TryCount` property), never in the broker or
//! a side table. Each delivery recomputes its state from that counter:
//!
//! ```text
//! Attempting ──ok──────────────────────────────► Done
//!     │
//!     └─err─► TryCount += 1
//!               ├─ count <= max ─► warn, sleep(jitter), republish ─► Attempting (next delivery)
//!               └─ count >  max ─► error, drop                     ─► Abandoned
//! ```

pub mod coordinator;
pub mod error;

pub use coordinator::{EventRetryCoordinator, HandleOutcome, RetryContext, RetryPolicy};
pub use error::{HandlerError, RetryableError};
