//! In-memory unit of work manager for tests/dev.
//!
//! Tracks how many scopes are live per (tenant, database) so tests can check
//! that each attempt runs in exactly one scope and that scopes are always released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{UnitOfWork, UnitOfWorkError, UnitOfWorkManager, UnitOfWorkOptions};
use crate::schema::{InMemorySchemaState, SchemaRunner};
use crate::tenancy::MigrationScope;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitOfWorkStats {
    pub begun: u64,
    pub completed: u64,
    pub released: u64,
    /// Scopes currently live.
    pub active: usize,
    /// Most scopes ever live at once for a single (tenant, database) pair.
    pub max_active_per_scope: usize,
    pub last_options: Option<UnitOfWorkOptions>,
}

#[derive(Debug, Default)]
struct Tracker {
    stats: UnitOfWorkStats,
    active_by_scope: HashMap<MigrationScope, usize>,
}

#[derive(Debug)]
pub struct InMemoryUnitOfWorkManager {
    schema: Arc<InMemorySchemaState>,
    tracker: Arc<Mutex<Tracker>>,
    next_id: AtomicU64,
}

impl InMemoryUnitOfWorkManager {
    pub fn new(schema: Arc<InMemorySchemaState>) -> Self {
        Self {
            schema,
            tracker: Arc::new(Mutex::new(Tracker::default())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn schema_state(&self) -> &Arc<InMemorySchemaState> {
        &self.schema
    }

    pub fn stats(&self) -> UnitOfWorkStats {
        lock(&self.tracker).stats.clone()
    }

    /// Number of (tenant, database) pairs with at least one live scope.
    pub fn live_scopes(&self) -> usize {
        lock(&self.tracker).active_by_scope.len()
    }
}

fn lock(tracker: &Mutex<Tracker>) -> std::sync::MutexGuard<'_, Tracker> {
    tracker.lock().unwrap_or_else(|p| p.into_inner())
}

#[async_trait]
impl UnitOfWorkManager for InMemoryUnitOfWorkManager {
    async fn begin(
        &self,
        scope: &MigrationScope,
        options: UnitOfWorkOptions,
    ) -> Result<Box<dyn UnitOfWork>, UnitOfWorkError> {
        {
            let mut t = lock(&self.tracker);
            let live = t.active_by_scope.entry(scope.clone()).or_insert(0);
            *live += 1;
            let live = *live;

            t.stats.begun += 1;
            t.stats.active += 1;
            t.stats.max_active_per_scope = t.stats.max_active_per_scope.max(live);
            t.stats.last_options = Some(options);
        }

        Ok(Box::new(InMemoryUnitOfWork {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            scope: scope.clone(),
            options,
            runner: Arc::new(self.schema.runner(scope.clone())),
            tracker: Arc::clone(&self.tracker),
            completed: false,
        }))
    }
}

struct InMemoryUnitOfWork {
    id: u64,
    scope: MigrationScope,
    options: UnitOfWorkOptions,
    runner: Arc<dyn SchemaRunner>,
    tracker: Arc<Mutex<Tracker>>,
    completed: bool,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    fn id(&self) -> u64 {
        self.id
    }

    fn scope(&self) -> &MigrationScope {
        &self.scope
    }

    fn options(&self) -> UnitOfWorkOptions {
        self.options
    }

    fn schema(&self) -> Arc<dyn SchemaRunner> {
        Arc::clone(&self.runner)
    }

    async fn complete(&mut self) -> Result<(), UnitOfWorkError> {
        if self.completed {
            return Err(UnitOfWorkError::AlreadyCompleted);
        }
        self.completed = true;
        lock(&self.tracker).stats.completed += 1;
        Ok(())
    }
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        let mut t = lock(&self.tracker);
        if let Some(live) = t.active_by_scope.get_mut(&self.scope) {
            *live = live.saturating_sub(1);
            if *live == 0 {
                t.active_by_scope.remove(&self.scope);
            }
        }
        t.stats.active = t.stats.active.saturating_sub(1);
        t.stats.released += 1;
    }
}
