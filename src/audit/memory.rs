//! In-process [`AuditSink`] that keeps records in a `Vec`.
//!
//! Used by the test suites and by embedders that want to inspect traffic
//! without a database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AuditSink, TrafficRecord};
use crate::error::AuditError;

#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<TrafficRecord>>,
    closes: AtomicUsize,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record written so far, in write order.
    #[must_use]
    pub fn records(&self) -> Vec<TrafficRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Relaxed)
    }

    fn push(&self, record: &TrafficRecord) -> Result<(), AuditError> {
        if self.close_count() > 0 {
            return Err(AuditError::Closed);
        }
        match self.records.lock() {
            Ok(mut guard) => guard.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn record_request(&self, record: &TrafficRecord) -> Result<(), AuditError> {
        self.push(record)
    }

    async fn record_response(&self, record: &TrafficRecord) -> Result<(), AuditError> {
        self.push(record)
    }

    async fn close(&self) -> Result<(), AuditError> {
        self.closes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
