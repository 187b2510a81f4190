//! Lock-acquisition hook for callers that need cross-instance mutual exclusion
//! on a (tenant, database) pair.
//!
//! The migration executor never takes a lock itself. Handlers can be configured
//! with a [`MigrationLock`] and acquire it around the executor call.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("lock provider unavailable: {0}")]
    Unavailable(String),
}

/// Held lock; released on drop.
pub struct LockGuard {
    key: String,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl LockGuard {
    pub fn new(key: impl Into<String>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            key: key.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl core::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

#[async_trait]
pub trait MigrationLock: Send + Sync {
    /// Try to take `key` without waiting. `Ok(None)` means someone else holds it.
    async fn try_acquire(&self, key: &str) -> Result<Option<LockGuard>, LockError>;
}

/// Process-local lock provider for tests/dev.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMigrationLock {
    held: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryMigrationLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(key))
            .unwrap_or(false)
    }
}

#[async_trait]
impl MigrationLock for InMemoryMigrationLock {
    async fn try_acquire(&self, key: &str) -> Result<Option<LockGuard>, LockError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| LockError::Unavailable("lock poisoned".to_string()))?;

        if !held.insert(key.to_string()) {
            return Ok(None);
        }

        let set = Arc::clone(&self.held);
        let owned = key.to_string();
        Ok(Some(LockGuard::new(key, move || {
            if let Ok(mut held) = set.lock() {
                held.remove(&owned);
            }
        })))
    }
}
