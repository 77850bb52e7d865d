use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::monitor::{ReadinessMonitor, WorkloadProbe};
use crate::config::IngressConfig;
use crate::models::{store_url, Engine, Tenant, TenantId, TenantStatus};
use crate::registry::TenantRegistry;
use crate::substrate::{
    ownership_selector, NamespaceInfo, Substrate, SubstrateError, WorkloadStatus, ENGINE_LABEL,
    TENANT_ID_LABEL,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub ready: usize,
    pub failed: usize,
    pub provisioning: usize,
    pub skipped: usize,
}

impl ReconcileReport {
    pub fn total(&self) -> usize {
        self.ready + self.failed + self.provisioning
    }
}

/// Rebuilds the registry from the namespaces this service owns
pub struct Reconciler {
    substrate: Arc<dyn Substrate>,
    registry: TenantRegistry,
    monitor: ReadinessMonitor,
    ingress: IngressConfig,
}

impl Reconciler {
    pub fn new(
        substrate: Arc<dyn Substrate>,
        registry: TenantRegistry,
        monitor: ReadinessMonitor,
        ingress: IngressConfig,
    ) -> Self {
        Self {
            substrate,
            registry,
            monitor,
            ingress,
        }
    }

    pub async fn run(&self) -> Result<ReconcileReport, SubstrateError> {
        let namespaces = self.substrate.list_namespaces(&ownership_selector()).await?;
        info!(count = namespaces.len(), "reconciling owned namespaces");

        let mut report = ReconcileReport::default();
        let mut tenants = Vec::with_capacity(namespaces.len());

        for ns in namespaces {
            if ns.terminating {
                debug!(namespace = %ns.name, "skipping terminating namespace");
                report.skipped += 1;
                continue;
            }
            let Some(tenant) = self.rebuild(&ns).await else {
                warn!(namespace = %ns.name, "owned namespace without a usable tenant id");
                report.skipped += 1;
                continue;
            };

            match tenant.status {
                TenantStatus::Ready => report.ready += 1,
                TenantStatus::Failed => report.failed += 1,
                _ => report.provisioning += 1,
            }
            tenants.push(tenant);
        }

        let converging: Vec<TenantId> = tenants
            .iter()
            .filter(|t| t.status == TenantStatus::Provisioning)
            .map(|t| t.id.clone())
            .collect();

        self.registry.replace_all(tenants);
        for id in converging {
            self.monitor.spawn(id);
        }

        info!(
            ready = report.ready,
            failed = report.failed,
            provisioning = report.provisioning,
            skipped = report.skipped,
            "reconciliation complete"
        );
        Ok(report)
    }

    async fn rebuild(&self, ns: &NamespaceInfo) -> Option<Tenant> {
        let id = ns
            .labels
            .get(TENANT_ID_LABEL)
            .filter(|v| !v.is_empty())
            .map(|v| TenantId::new(v.as_str()))
            .or_else(|| TenantId::from_namespace(&ns.name))?;

        let engine = ns
            .labels
            .get(ENGINE_LABEL)
            .and_then(|v| v.parse::<Engine>().ok())
            .unwrap_or_default();

        let url = store_url(&self.ingress.scheme, &ns.name, &self.ingress.domain);
        let created_at = ns.created_at.unwrap_or_else(Utc::now);
        let mut tenant = Tenant::new(id, engine, url, created_at);
        // The namespace name is authoritative for an existing store
        tenant.namespace = ns.name.clone();

        let probe = WorkloadProbe::read(self.substrate.as_ref(), &ns.name, engine).await;
        let profile = engine.profile();
        let (status, reason) = classify(&[
            (profile.database.name, &probe.database),
            (profile.app.name, &probe.app),
        ]);
        Some(tenant.with_status(status, reason))
    }
}

fn classify(workloads: &[(&str, &Result<WorkloadStatus, SubstrateError>)]) -> (TenantStatus, Option<String>) {
    for (name, status) in workloads {
        if let Err(e) = status {
            return (
                TenantStatus::Failed,
                Some(format!("could not read {} status: {}", name, e)),
            );
        }
    }
    for (name, status) in workloads {
        if let Ok(s) = status {
            if s.desired > 0 && s.ready == 0 {
                return (
                    TenantStatus::Failed,
                    Some(format!("{} unhealthy: 0/{} replicas ready", name, s.desired)),
                );
            }
        }
    }
    let all_ready = workloads
        .iter()
        .all(|(_, s)| matches!(s, Ok(s) if s.is_ready()));
    if all_ready {
        (TenantStatus::Ready, None)
    } else {
        (TenantStatus::Provisioning, None)
    }
}
