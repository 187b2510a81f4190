//! In-memory schema state for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use fleetmig_core::MigrationId;

use super::{SchemaError, SchemaRunner};
use crate::tenancy::MigrationScope;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub id: MigrationId,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Slot {
    pending: Vec<MigrationId>,
    applied: Vec<AppliedMigration>,
    failures_remaining: u32,
    pending_queries: u32,
    apply_calls: u32,
}

/// Pending/applied migrations per (tenant, database), with failure injection.
#[derive(Debug, Default)]
pub struct InMemorySchemaState {
    slots: Mutex<HashMap<MigrationScope, Slot>>,
}

impl InMemorySchemaState {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_slot<T>(&self, scope: &MigrationScope, f: impl FnOnce(&mut Slot) -> T) -> T {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        f(slots.entry(scope.clone()).or_default())
    }

    /// Register migrations that have not been applied yet.
    pub fn add_pending<I, M>(&self, scope: &MigrationScope, ids: I)
    where
        I: IntoIterator<Item = M>,
        M: Into<MigrationId>,
    {
        self.with_slot(scope, |slot| {
            slot.pending.extend(ids.into_iter().map(Into::into));
        });
    }

    /// Make the next `n` apply calls for `scope` fail.
    pub fn fail_next_applies(&self, scope: &MigrationScope, n: u32) {
        self.with_slot(scope, |slot| slot.failures_remaining = n);
    }

    pub fn applied(&self, scope: &MigrationScope) -> Vec<AppliedMigration> {
        self.with_slot(scope, |slot| slot.applied.clone())
    }

    pub fn pending(&self, scope: &MigrationScope) -> Vec<MigrationId> {
        self.with_slot(scope, |slot| slot.pending.clone())
    }

    pub fn apply_calls(&self, scope: &MigrationScope) -> u32 {
        self.with_slot(scope, |slot| slot.apply_calls)
    }

    pub fn pending_queries(&self, scope: &MigrationScope) -> u32 {
        self.with_slot(scope, |slot| slot.pending_queries)
    }

    /// Pending-migration queries across every scope.
    pub fn total_pending_queries(&self) -> u32 {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.values().map(|s| s.pending_queries).sum()
    }

    /// Handle bound to one scope.
    pub fn runner(self: &Arc<Self>, scope: MigrationScope) -> InMemorySchemaRunner {
        InMemorySchemaRunner {
            state: Arc::clone(self),
            scope,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InMemorySchemaRunner {
    state: Arc<InMemorySchemaState>,
    scope: MigrationScope,
}

#[async_trait]
impl SchemaRunner for InMemorySchemaRunner {
    async fn pending_migrations(&self) -> Result<Vec<MigrationId>, SchemaError> {
        Ok(self.state.with_slot(&self.scope, |slot| {
            slot.pending_queries += 1;
            slot.pending.clone()
        }))
    }

    async fn apply(&self) -> Result<(), SchemaError> {
        self.state.with_slot(&self.scope, |slot| {
            slot.apply_calls += 1;

            if slot.failures_remaining > 0 {
                slot.failures_remaining -= 1;
                return Err(SchemaError::Apply("injected failure".to_string()));
            }

            let now = Utc::now();
            slot.applied
                .extend(slot.pending.drain(..).map(|id| AppliedMigration { id, applied_at: now }));
            Ok(())
        })
    }
}
