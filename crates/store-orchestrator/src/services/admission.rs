use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::LimitsConfig;
use crate::utils::limiters::{FixedWindowLimiter, ProvisionPermit, ProvisionSlots};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdmissionError {
    #[error("Store capacity reached ({limit} stores)")]
    CapacityExceeded { limit: usize },

    #[error("Too many stores provisioning at once ({limit} in flight)")]
    ConcurrencyExceeded { limit: usize },

    #[error("Rate limit exceeded, retry in {}s", .retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },
}

/// Gates store creation on capacity, concurrency and request rate.
///
/// Checks run in that order. Decisions are best-effort: counts are read
/// without a lock spanning the subsequent pipeline.
#[derive(Clone)]
pub struct AdmissionController {
    max_stores: usize,
    slots: ProvisionSlots,
    rate: FixedWindowLimiter,
}

impl AdmissionController {
    pub fn new(cfg: &LimitsConfig) -> Self {
        Self {
            max_stores: cfg.max_stores,
            slots: ProvisionSlots::new(cfg.max_concurrent_provisions),
            rate: FixedWindowLimiter::new(cfg.rate_limit_requests, cfg.rate_limit_window()),
        }
    }

    /// Admit one creation request from `origin` given the current number of
    /// registered stores. The returned permit must live until the pipeline
    /// finishes.
    pub fn admit(
        &self,
        origin: &str,
        current_stores: usize,
    ) -> Result<ProvisionPermit, AdmissionError> {
        if current_stores >= self.max_stores {
            return Err(AdmissionError::CapacityExceeded {
                limit: self.max_stores,
            });
        }

        let permit = self
            .slots
            .try_acquire()
            .ok_or(AdmissionError::ConcurrencyExceeded {
                limit: self.slots.capacity(),
            })?;

        // A rate rejection drops `permit` on return
        self.rate
            .check(origin)
            .map_err(|retry_after| AdmissionError::RateLimited { retry_after })?;

        debug!(origin, in_flight = self.slots.in_flight(), "creation admitted");
        Ok(permit)
    }

    pub fn in_flight(&self) -> usize {
        self.slots.in_flight()
    }
}
