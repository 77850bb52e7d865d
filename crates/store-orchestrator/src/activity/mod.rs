//! Append-only record of store create and delete actions

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::models::Tenant;

/// Action categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    StoreCreated,
    StoreDeleted,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoreCreated => "store_created",
            Self::StoreDeleted => "store_deleted",
        }
    }
}

/// One activity entry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub action: ActivityAction,
    pub store_id: String,
    pub namespace: String,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn for_tenant(action: ActivityAction, tenant: &Tenant) -> Self {
        Self {
            action,
            store_id: tenant.id.to_string(),
            namespace: tenant.namespace.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone, Default)]
pub struct ActivityLog {
    entries: Arc<RwLock<Vec<ActivityEntry>>>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: ActivityEntry) {
        info!(
            action = entry.action.as_str(),
            store_id = %entry.store_id,
            namespace = %entry.namespace,
            "activity"
        );
        self.entries.write().push(entry);
    }

    /// Entries in insertion order
    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Engine, TenantId};

    #[test]
    fn test_append_only_order() {
        let log = ActivityLog::new();
        let tenant = Tenant::new(
            TenantId::from("abcd1234"),
            Engine::Woocommerce,
            "http://store-abcd1234.localhost".into(),
            Utc::now(),
        );

        log.record(ActivityEntry::for_tenant(ActivityAction::StoreCreated, &tenant));
        log.record(ActivityEntry::for_tenant(ActivityAction::StoreDeleted, &tenant));

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, ActivityAction::StoreCreated);
        assert_eq!(entries[1].action, ActivityAction::StoreDeleted);

        let json = serde_json::to_value(&entries[0]).unwrap();
        assert_eq!(json["action"], "store_created");
        assert_eq!(json["storeId"], "abcd1234");
        assert_eq!(json["namespace"], "store-abcd1234");
    }
}
