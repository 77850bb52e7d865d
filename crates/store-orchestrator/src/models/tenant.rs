use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::engine::Engine;

/// Prefix shared by every tenant namespace
pub const NAMESPACE_PREFIX: &str = "store-";

/// Opaque short tenant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Fresh identifier: the first 8 hex characters of a v4 UUID
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(raw[..8].to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace owned by this tenant. One namespace per id, never shared.
    pub fn namespace(&self) -> String {
        format!("{}{}", NAMESPACE_PREFIX, self.0)
    }

    /// Inverse of [`TenantId::namespace`]
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        namespace
            .strip_prefix(NAMESPACE_PREFIX)
            .filter(|id| !id.is_empty())
            .map(Self::new)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Tenant lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantStatus {
    Provisioning,
    Ready,
    Failed,
    Deleting,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Provisioning => "Provisioning",
            TenantStatus::Ready => "Ready",
            TenantStatus::Failed => "Failed",
            TenantStatus::Deleting => "Deleting",
        }
    }

    /// Allowed edges of the lifecycle. Removal after `Deleting` is not a
    /// status change and is handled by the registry directly.
    pub fn can_transition_to(self, next: TenantStatus) -> bool {
        use TenantStatus::*;
        matches!(
            (self, next),
            (Provisioning, Ready)
                | (Provisioning, Failed)
                | (Provisioning, Deleting)
                | (Ready, Deleting)
                | (Failed, Deleting)
                | (Deleting, Deleting)
        )
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One customer's store and its lifecycle record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: TenantId,
    pub namespace: String,
    pub engine: Engine,
    pub status: TenantStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(id: TenantId, engine: Engine, url: String, created_at: DateTime<Utc>) -> Self {
        Self {
            namespace: id.namespace(),
            id,
            engine,
            status: TenantStatus::Provisioning,
            failure_reason: None,
            url,
            created_at,
        }
    }

    /// Copy of this record moved to `status`. Only `Failed` keeps a reason.
    pub fn with_status(&self, status: TenantStatus, reason: Option<String>) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.failure_reason = match status {
            TenantStatus::Failed => reason,
            _ => None,
        };
        next
    }
}

/// Externally reachable address for a namespace
pub fn store_url(scheme: &str, namespace: &str, domain: &str) -> String {
    format!("{}://{}.{}", scheme, namespace, domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_namespace_roundtrip() {
        let id = TenantId::generate();
        assert_eq!(id.as_str().len(), 8);

        let ns = id.namespace();
        assert!(ns.starts_with("store-"));
        assert_eq!(TenantId::from_namespace(&ns), Some(id));
        assert_eq!(TenantId::from_namespace("kube-system"), None);
        assert_eq!(TenantId::from_namespace("store-"), None);
    }

    #[test]
    fn test_generated_ids_do_not_collide() {
        let ids: HashSet<String> = (0..1000).map(|_| TenantId::generate().namespace()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_transitions() {
        use TenantStatus::*;
        assert!(Provisioning.can_transition_to(Ready));
        assert!(Provisioning.can_transition_to(Failed));
        assert!(Provisioning.can_transition_to(Deleting));
        assert!(Ready.can_transition_to(Deleting));
        assert!(Failed.can_transition_to(Deleting));

        assert!(!Ready.can_transition_to(Failed));
        assert!(!Ready.can_transition_to(Provisioning));
        assert!(!Failed.can_transition_to(Ready));
        assert!(!Deleting.can_transition_to(Ready));
    }

    #[test]
    fn test_serializes_camel_case() {
        let tenant = Tenant::new(
            TenantId::from("abcd1234"),
            Engine::Woocommerce,
            store_url("http", "store-abcd1234", "localhost"),
            Utc::now(),
        );
        let json = serde_json::to_value(&tenant).unwrap();

        assert_eq!(json["id"], "abcd1234");
        assert_eq!(json["namespace"], "store-abcd1234");
        assert_eq!(json["status"], "Provisioning");
        assert_eq!(json["url"], "http://store-abcd1234.localhost");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("failureReason").is_none());
    }

    #[test]
    fn test_only_failed_keeps_reason() {
        let tenant = Tenant::new(
            TenantId::from("abcd1234"),
            Engine::Woocommerce,
            "http://x".to_string(),
            Utc::now(),
        );
        let failed = tenant.with_status(TenantStatus::Failed, Some("boom".into()));
        assert_eq!(failed.failure_reason.as_deref(), Some("boom"));

        let deleting = failed.with_status(TenantStatus::Deleting, Some("ignored".into()));
        assert!(deleting.failure_reason.is_none());
    }
}
