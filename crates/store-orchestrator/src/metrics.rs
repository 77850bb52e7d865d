use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct Metrics {
    started: Instant,
    pub stores_created_total: AtomicU64,
    pub provisioning_failures_total: AtomicU64,
    pub deletions_total: AtomicU64,
    pub deletion_failures_total: AtomicU64,
    pub rejected_requests_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            stores_created_total: AtomicU64::new(0),
            provisioning_failures_total: AtomicU64::new(0),
            deletions_total: AtomicU64::new(0),
            deletion_failures_total: AtomicU64::new(0),
            rejected_requests_total: AtomicU64::new(0),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn inc_created(&self) {
        self.stores_created_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_provisioning_failure(&self) {
        self.provisioning_failures_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_deleted(&self) {
        self.deletions_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_deletion_failure(&self) {
        self.deletion_failures_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_rejected(&self) {
        self.rejected_requests_total.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate counts served by `GET /metrics`
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total: usize,
    pub ready: usize,
    pub failed: usize,
    pub provisioning: usize,
    pub deleting: usize,
    pub total_created: u64,
    pub provisioning_failures: u64,
    pub deletions: u64,
    pub deletion_failures: u64,
    pub rejected_requests: u64,
    pub in_flight: usize,
    pub uptime_seconds: u64,
}
