use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReadinessConfig;
use crate::models::{Engine, TenantId, TenantStatus};
use crate::registry::{TenantRegistry, Transition};
use crate::substrate::{Substrate, SubstrateError, WorkloadKind, WorkloadStatus};

/// Status of both workloads of one store, read back to back
#[derive(Debug, Clone)]
pub struct WorkloadProbe {
    pub database: Result<WorkloadStatus, SubstrateError>,
    pub app: Result<WorkloadStatus, SubstrateError>,
}

impl WorkloadProbe {
    pub async fn read(substrate: &dyn Substrate, namespace: &str, engine: Engine) -> Self {
        let profile = engine.profile();
        let database = substrate
            .read_workload_status(namespace, WorkloadKind::StatefulSet, profile.database.name)
            .await;
        let app = substrate
            .read_workload_status(namespace, WorkloadKind::Deployment, profile.app.name)
            .await;
        Self { database, app }
    }

    pub fn is_ready(&self) -> bool {
        matches!((&self.database, &self.app), (Ok(db), Ok(app)) if db.is_ready() && app.is_ready())
    }

    pub fn first_error(&self) -> Option<&SubstrateError> {
        self.database.as_ref().err().or(self.app.as_ref().err())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorOutcome {
    Ready { attempts: u32 },
    Failed { attempts: u32, reason: String },
    /// The store was deleted or had already left `Provisioning`
    Skipped,
    Cancelled,
}

struct MonitorHandle {
    generation: u64,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

/// Bounded readiness polling for freshly provisioned stores.
///
/// Each store gets at most one detached task, tracked by id together with
/// its cancellation token. Every status write re-checks the registry, so a
/// monitor outliving its store never resurrects or corrupts a record.
#[derive(Clone)]
pub struct ReadinessMonitor {
    substrate: Arc<dyn Substrate>,
    registry: TenantRegistry,
    max_attempts: u32,
    interval: Duration,
    tasks: Arc<DashMap<TenantId, MonitorHandle>>,
    generation: Arc<AtomicU64>,
}

impl ReadinessMonitor {
    pub fn new(substrate: Arc<dyn Substrate>, registry: TenantRegistry, cfg: &ReadinessConfig) -> Self {
        Self {
            substrate,
            registry,
            max_attempts: cfg.max_attempts.max(1),
            interval: cfg.interval(),
            tasks: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Launch a detached monitor for `id`, replacing any previous one
    pub fn spawn(&self, id: TenantId) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        // The shard lock is held until the handle is stored, so the task's
        // own cleanup cannot run before it.
        let entry = self.tasks.entry(id.clone());
        if let Entry::Occupied(ref previous) = entry {
            previous.get().cancel.cancel();
        }

        let monitor = self.clone();
        let token = cancel.clone();
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            let outcome = monitor.run(&task_id, &token).await;
            debug!(store_id = %task_id, ?outcome, "readiness monitor finished");
            monitor
                .tasks
                .remove_if(&task_id, |_, handle| handle.generation == generation);
        });

        entry.insert(MonitorHandle {
            generation,
            cancel,
            _task: task,
        });
    }

    /// Stop the monitor of `id`, if one is running
    pub fn cancel(&self, id: &TenantId) -> bool {
        match self.tasks.remove(id) {
            Some((_, handle)) => {
                handle.cancel.cancel();
                debug!(store_id = %id, "readiness monitor cancelled");
                true
            }
            None => false,
        }
    }

    pub fn shutdown(&self) {
        for entry in self.tasks.iter() {
            entry.cancel.cancel();
        }
        self.tasks.clear();
    }

    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_monitoring(&self, id: &TenantId) -> bool {
        self.tasks.contains_key(id)
    }

    /// Poll until both workloads are ready or the attempt budget runs out
    pub async fn run(&self, id: &TenantId, cancel: &CancellationToken) -> MonitorOutcome {
        let mut last_probe: Option<WorkloadProbe> = None;

        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return MonitorOutcome::Cancelled;
            }

            let Some(tenant) = self.registry.get(id) else {
                return MonitorOutcome::Skipped;
            };
            if tenant.status != TenantStatus::Provisioning {
                return MonitorOutcome::Skipped;
            }

            let probe = WorkloadProbe::read(self.substrate.as_ref(), &tenant.namespace, tenant.engine).await;
            if probe.is_ready() {
                return match self.registry.transition(id, TenantStatus::Ready, None) {
                    Transition::Applied(_) => {
                        info!(store_id = %id, attempts = attempt, "store ready");
                        MonitorOutcome::Ready { attempts: attempt }
                    }
                    _ => MonitorOutcome::Skipped,
                };
            }
            if let Some(e) = probe.first_error() {
                debug!(store_id = %id, attempt, error = %e, "readiness check failed, retrying");
            }
            last_probe = Some(probe);

            if attempt < self.max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return MonitorOutcome::Cancelled,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
        }

        let reason = failure_reason(self.max_attempts, last_probe.as_ref());
        match self
            .registry
            .transition(id, TenantStatus::Failed, Some(reason.clone()))
        {
            Transition::Applied(_) => {
                warn!(store_id = %id, reason = %reason, "store failed to become ready");
                MonitorOutcome::Failed {
                    attempts: self.max_attempts,
                    reason,
                }
            }
            _ => MonitorOutcome::Skipped,
        }
    }
}

fn describe(status: &Result<WorkloadStatus, SubstrateError>) -> String {
    match status {
        Ok(s) => format!("{}/{} ready", s.ready, s.desired),
        Err(_) => "unknown".to_string(),
    }
}

fn failure_reason(attempts: u32, probe: Option<&WorkloadProbe>) -> String {
    match probe {
        Some(p) => match p.first_error() {
            Some(e) => format!(
                "readiness could not be determined after {} attempts: {}",
                attempts, e
            ),
            None => format!(
                "workloads never reported ready after {} attempts (database {}, app {})",
                attempts,
                describe(&p.database),
                describe(&p.app)
            ),
        },
        None => format!("readiness could not be determined after {} attempts", attempts),
    }
}
