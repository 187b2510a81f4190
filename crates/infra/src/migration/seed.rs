//! Data seeding hook run after a new tenant's schema is in place.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use thiserror::Error;

use fleetmig_core::TenantId;
use fleetmig_events::Properties;

use crate::tenancy::TenantContext;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("data seeding failed: {0}")]
pub struct SeedError(pub String);

/// Seeds initial data for a tenant (admin user, reference data, ...).
///
/// Must be idempotent: a retried `TenantCreated` event seeds again.
#[async_trait]
pub trait DataSeeder: Send + Sync {
    async fn seed(&self, context: TenantContext, properties: &Properties) -> Result<(), SeedError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDataSeeder;

#[async_trait]
impl DataSeeder for NoopDataSeeder {
    async fn seed(&self, _context: TenantContext, _properties: &Properties) -> Result<(), SeedError> {
        Ok(())
    }
}

/// Records every seed call; can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingDataSeeder {
    calls: Mutex<Vec<(Option<TenantId>, Properties)>>,
    failures_remaining: AtomicU32,
}

impl RecordingDataSeeder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(Option<TenantId>, Properties)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DataSeeder for RecordingDataSeeder {
    async fn seed(&self, context: TenantContext, properties: &Properties) -> Result<(), SeedError> {
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SeedError("injected failure".to_string()));
        }

        if let Ok(mut calls) = self.calls.lock() {
            calls.push((context.tenant_id(), properties.clone()));
        }
        Ok(())
    }
}
