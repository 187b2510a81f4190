//! Background workers.
//!
//! Workers consume events from the bus and dispatch them to handlers.

pub mod event_worker;

pub use event_worker::{EventWorker, WorkerHandle};
