use dashmap::DashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::monitor::ReadinessMonitor;
use crate::activity::{ActivityAction, ActivityEntry, ActivityLog};
use crate::error::{OrchestratorError, Result};
use crate::metrics::Metrics;
use crate::models::{TenantId, TenantStatus};
use crate::registry::{TenantRegistry, Transition};
use crate::substrate::{DeleteOutcome, Substrate};

/// What a successful delete actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Removed,
    /// Deleted earlier in this process lifetime
    AlreadyGone,
}

/// Held while one delete of an id runs; released on drop
struct DeleteClaim<'a> {
    in_progress: &'a DashSet<TenantId>,
    id: TenantId,
}

impl Drop for DeleteClaim<'_> {
    fn drop(&mut self) {
        self.in_progress.remove(&self.id);
    }
}

/// Tears stores down. At most one delete per id runs at a time; a retry is
/// accepted once the previous attempt has finished.
pub struct DeletionWorkflow {
    substrate: Arc<dyn Substrate>,
    registry: TenantRegistry,
    monitor: ReadinessMonitor,
    activity: ActivityLog,
    metrics: Arc<Metrics>,
    in_progress: DashSet<TenantId>,
}

impl DeletionWorkflow {
    pub fn new(
        substrate: Arc<dyn Substrate>,
        registry: TenantRegistry,
        monitor: ReadinessMonitor,
        activity: ActivityLog,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            substrate,
            registry,
            monitor,
            activity,
            metrics,
            in_progress: DashSet::new(),
        }
    }

    fn claim(&self, id: &TenantId) -> Option<DeleteClaim<'_>> {
        self.in_progress.insert(id.clone()).then(|| DeleteClaim {
            in_progress: &self.in_progress,
            id: id.clone(),
        })
    }

    pub async fn delete(&self, id: &TenantId) -> Result<Deletion> {
        let Some(_claim) = self.claim(id) else {
            warn!(store_id = %id, "delete already in progress");
            return Err(OrchestratorError::DeletionInProgress(id.clone()));
        };

        let tenant = match self.registry.transition(id, TenantStatus::Deleting, None) {
            Transition::Applied(tenant) => tenant,
            Transition::Missing if self.registry.was_retired(id) => {
                info!(store_id = %id, "store already deleted");
                return Ok(Deletion::AlreadyGone);
            }
            Transition::Missing => return Err(OrchestratorError::NotFound(id.clone())),
            Transition::Rejected { current } => {
                // Not reachable with the current lifecycle
                warn!(store_id = %id, status = %current, "delete rejected by lifecycle");
                return Err(OrchestratorError::NotFound(id.clone()));
            }
        };

        self.monitor.cancel(id);

        match self.substrate.delete_namespace(&tenant.namespace).await {
            Ok(outcome) => {
                if outcome == DeleteOutcome::AlreadyAbsent {
                    warn!(store_id = %id, namespace = %tenant.namespace, "namespace already absent");
                }
                self.registry.retire(id);
                self.activity
                    .record(ActivityEntry::for_tenant(ActivityAction::StoreDeleted, &tenant));
                self.metrics.inc_deleted();
                info!(store_id = %id, namespace = %tenant.namespace, "store deleted");
                Ok(Deletion::Removed)
            }
            Err(source) => {
                error!(store_id = %id, namespace = %tenant.namespace, error = %source, "namespace delete failed");
                self.metrics.inc_deletion_failure();
                Err(OrchestratorError::DeletionFailed {
                    id: id.clone(),
                    source,
                })
            }
        }
    }
}
