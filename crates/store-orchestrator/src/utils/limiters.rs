use dashmap::DashMap;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Windows are swept once the map holds this many origins
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by client origin
#[derive(Clone)]
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    windows: Arc<DashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Arc::new(DashMap::new()),
        }
    }

    /// Count one request for `origin`. `Err` carries the time left until
    /// the origin's window resets.
    pub fn check(&self, origin: &str) -> Result<(), Duration> {
        self.check_at(origin, Instant::now())
    }

    fn check_at(&self, origin: &str, now: Instant) -> Result<(), Duration> {
        if self.windows.len() >= SWEEP_THRESHOLD {
            self.sweep(now);
        }

        let mut entry = self.windows.entry(origin.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.limit {
            let elapsed = now.duration_since(entry.started);
            return Err(self.window.saturating_sub(elapsed));
        }

        entry.count += 1;
        Ok(())
    }

    fn sweep(&self, now: Instant) {
        let window = self.window;
        self.windows
            .retain(|_, w| now.duration_since(w.started) < window);
    }
}

/// Scoped slot for one in-flight provisioning. Dropping it frees the slot.
#[derive(Debug)]
pub struct ProvisionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Bounded number of provisioning pipelines running at once
#[derive(Clone)]
pub struct ProvisionSlots {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ProvisionSlots {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a slot without waiting
    pub fn try_acquire(&self) -> Option<ProvisionPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| ProvisionPermit { _permit: permit })
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
