//! Retry counter embedded in an event's property bag.
//!
//! The count travels with the event itself, so it survives consumer restarts and
//! needs no side table. It is stored as a decimal string under [`TRY_COUNT_KEY`].

use thiserror::Error;

use crate::event::HasProperties;

/// Property key holding the number of failed attempts.
pub const TRY_COUNT_KEY: &str = "TryCount";

/// Failed attempts allowed before an event is abandoned (retries 1..=3).
pub const MAX_TRY_COUNT: u32 = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryCountError {
    /// The property is present but not a non-negative integer.
    #[error("malformed TryCount property {value:?}: {reason}")]
    Parse { value: String, reason: String },

    #[error("TryCount overflowed")]
    Overflow,
}

/// Read the try count; absent or blank means 0.
pub fn try_count<E: HasProperties + ?Sized>(event: &E) -> Result<u32, RetryCountError> {
    let Some(raw) = event.properties().get(TRY_COUNT_KEY) else {
        return Ok(0);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }

    trimmed.parse::<u32>().map_err(|e| RetryCountError::Parse {
        value: raw.clone(),
        reason: e.to_string(),
    })
}

/// Overwrite the try count.
pub fn set_try_count<E: HasProperties + ?Sized>(event: &mut E, count: u32) {
    event
        .properties_mut()
        .insert(TRY_COUNT_KEY.to_string(), count.to_string());
}

/// Add one failed attempt and return the new count.
///
/// Not atomic; an event instance is owned by exactly one handler invocation.
pub fn increment_try_count<E: HasProperties + ?Sized>(event: &mut E) -> Result<u32, RetryCountError> {
    let next = try_count(&*event)?
        .checked_add(1)
        .ok_or(RetryCountError::Overflow)?;
    set_try_count(event, next);
    Ok(next)
}
