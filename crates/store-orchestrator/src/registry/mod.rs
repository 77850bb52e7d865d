use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Tenant, TenantId, TenantStatus};

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("Tenant {0} already registered")]
    Duplicate(TenantId),
}

/// Result of a status change request
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(Tenant),
    /// Record no longer exists (deleted meanwhile)
    Missing,
    /// The lifecycle forbids moving from `current`
    Rejected { current: TenantStatus },
}

/// Thread-safe in-memory directory of tenants.
///
/// Records are immutable snapshots replaced whole under the per-key shard
/// lock; the underlying map is never handed out.
#[derive(Clone, Default)]
pub struct TenantRegistry {
    storage: Arc<DashMap<TenantId, Tenant>>,
    /// Ids removed after a confirmed delete, kept so repeated deletes succeed
    retired: Arc<DashMap<TenantId, DateTime<Utc>>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant: Tenant) -> Result<(), RegistryError> {
        if self.retired.contains_key(&tenant.id) {
            return Err(RegistryError::Duplicate(tenant.id));
        }
        match self.storage.entry(tenant.id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(tenant.id)),
            Entry::Vacant(slot) => {
                debug!(store_id = %tenant.id, "registered tenant");
                slot.insert(tenant);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &TenantId) -> Option<Tenant> {
        self.storage.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every record, oldest first
    pub fn list(&self) -> Vec<Tenant> {
        let mut tenants: Vec<Tenant> = self.storage.iter().map(|e| e.value().clone()).collect();
        tenants.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        tenants
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn count_in(&self, status: TenantStatus) -> usize {
        self.storage
            .iter()
            .filter(|e| e.value().status == status)
            .count()
    }

    /// Move a record along the lifecycle. Check and replace happen under
    /// the same shard lock.
    pub fn transition(
        &self,
        id: &TenantId,
        status: TenantStatus,
        reason: Option<String>,
    ) -> Transition {
        let Some(mut entry) = self.storage.get_mut(id) else {
            return Transition::Missing;
        };

        let current = entry.status;
        if !current.can_transition_to(status) {
            warn!(
                store_id = %id,
                from = %current,
                to = %status,
                "rejected status transition"
            );
            return Transition::Rejected { current };
        }

        let next = entry.with_status(status, reason);
        *entry = next.clone();
        Transition::Applied(next)
    }

    /// Drop a record after its namespace is confirmed gone
    pub fn retire(&self, id: &TenantId) -> Option<Tenant> {
        let removed = self.storage.remove(id).map(|(_, t)| t);
        if removed.is_some() {
            self.retired.insert(id.clone(), Utc::now());
        }
        removed
    }

    pub fn was_retired(&self, id: &TenantId) -> bool {
        self.retired.contains_key(id)
    }

    /// Drop a record without remembering it (rolled back creation)
    pub fn discard(&self, id: &TenantId) -> Option<Tenant> {
        self.storage.remove(id).map(|(_, t)| t)
    }

    /// Replace the whole directory with records rebuilt from the substrate
    pub fn replace_all(&self, tenants: Vec<Tenant>) {
        self.storage.clear();
        for tenant in tenants {
            self.storage.insert(tenant.id.clone(), tenant);
        }
        info!(count = self.storage.len(), "registry rebuilt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Engine;
    use chrono::Duration;

    fn tenant(id: &str) -> Tenant {
        Tenant::new(
            TenantId::from(id),
            Engine::Woocommerce,
            format!("http://store-{}.localhost", id),
            Utc::now(),
        )
    }

    #[test]
    fn test_registry_basic_operations() {
        let registry = TenantRegistry::new();
        registry.insert(tenant("aaaa0001")).unwrap();
        assert_eq!(registry.len(), 1);

        let id = TenantId::from("aaaa0001");
        assert_eq!(registry.get(&id).unwrap().status, TenantStatus::Provisioning);

        assert_eq!(
            registry.insert(tenant("aaaa0001")),
            Err(RegistryError::Duplicate(id.clone()))
        );

        assert!(registry.retire(&id).is_some());
        assert!(registry.is_empty());
        assert!(registry.was_retired(&id));
        assert!(registry.insert(tenant("aaaa0001")).is_err());
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let registry = TenantRegistry::new();
        registry.insert(tenant("aaaa0002")).unwrap();
        let id = TenantId::from("aaaa0002");

        let applied = registry.transition(&id, TenantStatus::Ready, None);
        assert!(matches!(applied, Transition::Applied(ref t) if t.status == TenantStatus::Ready));

        let rejected = registry.transition(&id, TenantStatus::Failed, Some("late".into()));
        assert_eq!(
            rejected,
            Transition::Rejected {
                current: TenantStatus::Ready
            }
        );
        assert_eq!(registry.get(&id).unwrap().status, TenantStatus::Ready);
        assert!(registry.get(&id).unwrap().failure_reason.is_none());

        assert_eq!(
            registry.transition(&TenantId::from("missing0"), TenantStatus::Ready, None),
            Transition::Missing
        );
    }

    #[test]
    fn test_list_is_ordered_by_creation() {
        let registry = TenantRegistry::new();
        let mut newer = tenant("bbbb0001");
        newer.created_at = Utc::now() + Duration::seconds(10);
        registry.insert(newer).unwrap();
        registry.insert(tenant("aaaa0003")).unwrap();

        let ids: Vec<String> = registry.list().iter().map(|t| t.id.to_string()).collect();
        assert_eq!(ids, vec!["aaaa0003", "bbbb0001"]);
    }

    #[test]
    fn test_replace_all_and_counts() {
        let registry = TenantRegistry::new();
        registry.insert(tenant("old00000")).unwrap();

        let ready = tenant("new00001").with_status(TenantStatus::Ready, None);
        let failed = tenant("new00002").with_status(TenantStatus::Failed, Some("x".into()));
        registry.replace_all(vec![ready, failed]);

        assert_eq!(registry.len(), 2);
        assert!(registry.get(&TenantId::from("old00000")).is_none());
        assert_eq!(registry.count_in(TenantStatus::Ready), 1);
        assert_eq!(registry.count_in(TenantStatus::Failed), 1);
    }
}
