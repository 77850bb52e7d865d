use std::sync::Arc;
use tracing::{info, warn};

use super::admission::AdmissionController;
use super::deletion::{Deletion, DeletionWorkflow};
use super::monitor::ReadinessMonitor;
use super::pipeline::ProvisioningPipeline;
use super::reconciler::{ReconcileReport, Reconciler};
use crate::activity::{ActivityAction, ActivityEntry, ActivityLog};
use crate::config::Settings;
use crate::error::{OrchestratorError, Result};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::models::{Engine, Tenant, TenantId, TenantStatus};
use crate::registry::TenantRegistry;
use crate::substrate::{Substrate, SubstrateError};
use crate::utils::limiters::ProvisionPermit;

/// Entry point for every store operation the HTTP layer exposes
pub struct StoreOrchestrator {
    registry: TenantRegistry,
    admission: AdmissionController,
    pipeline: Arc<ProvisioningPipeline>,
    monitor: ReadinessMonitor,
    deletion: DeletionWorkflow,
    reconciler: Reconciler,
    activity: ActivityLog,
    metrics: Arc<Metrics>,
}

impl StoreOrchestrator {
    pub fn new(substrate: Arc<dyn Substrate>, settings: &Settings) -> Self {
        let registry = TenantRegistry::new();
        let activity = ActivityLog::new();
        let metrics = Arc::new(Metrics::new());
        let monitor = ReadinessMonitor::new(substrate.clone(), registry.clone(), &settings.readiness);

        Self {
            admission: AdmissionController::new(&settings.limits),
            pipeline: Arc::new(ProvisioningPipeline::new(
                substrate.clone(),
                registry.clone(),
                settings.ingress.clone(),
                settings.tenant.clone(),
            )),
            deletion: DeletionWorkflow::new(
                substrate.clone(),
                registry.clone(),
                monitor.clone(),
                activity.clone(),
                metrics.clone(),
            ),
            reconciler: Reconciler::new(
                substrate,
                registry.clone(),
                monitor.clone(),
                settings.ingress.clone(),
            ),
            registry,
            monitor,
            activity,
            metrics,
        }
    }

    /// Admit, provision and start watching a new store.
    ///
    /// `engine` defaults to the standard engine when absent. The returned
    /// record is still `Provisioning`; readiness is tracked in the
    /// background. Provisioning runs on its own task, so it completes (or
    /// rolls back) even when the caller stops waiting.
    pub async fn create(&self, origin: &str, engine: Option<&str>) -> Result<Tenant> {
        let engine = match engine {
            None => Engine::default(),
            Some(name) => name
                .parse::<Engine>()
                .map_err(|e| OrchestratorError::UnsupportedEngine(e.0))?,
        };

        let permit = self
            .admission
            .admit(origin, self.registry.len())
            .inspect_err(|e| {
                self.metrics.inc_rejected();
                warn!(origin, error = %e, "store creation rejected");
            })?;

        let id = TenantId::generate();
        info!(store_id = %id, engine = %engine, origin, "provisioning store");

        let job = ProvisionJob {
            pipeline: self.pipeline.clone(),
            monitor: self.monitor.clone(),
            activity: self.activity.clone(),
            metrics: self.metrics.clone(),
        };
        tokio::spawn(job.run(id, engine, permit))
            .await
            .map_err(|e| OrchestratorError::ProvisioningAborted(e.to_string()))?
    }

    pub async fn delete(&self, id: &TenantId) -> Result<Deletion> {
        self.deletion.delete(id).await
    }

    pub fn get(&self, id: &TenantId) -> Result<Tenant> {
        self.registry
            .get(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.clone()))
    }

    pub fn list(&self) -> Vec<Tenant> {
        self.registry.list()
    }

    pub fn activity(&self) -> Vec<ActivityEntry> {
        self.activity.entries()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        use std::sync::atomic::Ordering::Relaxed;

        let m = &self.metrics;
        MetricsSnapshot {
            total: self.registry.len(),
            ready: self.registry.count_in(TenantStatus::Ready),
            failed: self.registry.count_in(TenantStatus::Failed),
            provisioning: self.registry.count_in(TenantStatus::Provisioning),
            deleting: self.registry.count_in(TenantStatus::Deleting),
            total_created: m.stores_created_total.load(Relaxed),
            provisioning_failures: m.provisioning_failures_total.load(Relaxed),
            deletions: m.deletions_total.load(Relaxed),
            deletion_failures: m.deletion_failures_total.load(Relaxed),
            rejected_requests: m.rejected_requests_total.load(Relaxed),
            in_flight: self.admission.in_flight(),
            uptime_seconds: m.uptime_secs(),
        }
    }

    /// Rebuild the registry from the substrate
    pub async fn reconcile(&self) -> std::result::Result<ReconcileReport, SubstrateError> {
        self.reconciler.run().await
    }

    /// Cancel every running readiness monitor
    pub fn shutdown(&self) {
        let active = self.monitor.active();
        self.monitor.shutdown();
        info!(monitors = active, "orchestrator shut down");
    }
}

/// Everything one provisioning run touches, detached from the request
struct ProvisionJob {
    pipeline: Arc<ProvisioningPipeline>,
    monitor: ReadinessMonitor,
    activity: ActivityLog,
    metrics: Arc<Metrics>,
}

impl ProvisionJob {
    async fn run(self, id: TenantId, engine: Engine, permit: ProvisionPermit) -> Result<Tenant> {
        let result = self.pipeline.provision(id.clone(), engine).await;
        drop(permit);

        match result {
            Ok(tenant) => {
                self.metrics.inc_created();
                self.activity
                    .record(ActivityEntry::for_tenant(ActivityAction::StoreCreated, &tenant));
                if tenant.status == TenantStatus::Provisioning {
                    self.monitor.spawn(id);
                }
                Ok(tenant)
            }
            Err(e) => {
                self.metrics.inc_provisioning_failure();
                Err(e.into())
            }
        }
    }
}
