//! Substrate port: the cluster control plane that stores are provisioned into.
//!
//! The orchestrator only issues declarative intents through this trait. Two
//! adapters exist: [`KubeSubstrate`] for a real Kubernetes API server and
//! [`InMemorySubstrate`] for local runs and tests.

mod kube;
mod memory;

pub use kube::KubeSubstrate;
pub use memory::{HeldCall, InMemorySubstrate};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Label marking namespaces owned by this service
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "store-orchestrator";
pub const TENANT_ID_LABEL: &str = "store-orchestrator/tenant-id";
pub const ENGINE_LABEL: &str = "store-orchestrator/engine";

pub type Labels = BTreeMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubstrateError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("substrate unreachable: {0}")]
    Unreachable(String),

    #[error("substrate API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected substrate response: {0}")]
    Decode(String),
}

impl SubstrateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SubstrateError::NotFound { .. })
    }
}

/// Namespaced object kinds the pipeline creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Secret,
    Service,
    ResourceQuota,
    LimitRange,
    NetworkPolicy,
    StatefulSet,
    Deployment,
    Ingress,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Secret => "Secret",
            ObjectKind::Service => "Service",
            ObjectKind::ResourceQuota => "ResourceQuota",
            ObjectKind::LimitRange => "LimitRange",
            ObjectKind::NetworkPolicy => "NetworkPolicy",
            ObjectKind::StatefulSet => "StatefulSet",
            ObjectKind::Deployment => "Deployment",
            ObjectKind::Ingress => "Ingress",
        }
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            ObjectKind::Secret
            | ObjectKind::Service
            | ObjectKind::ResourceQuota
            | ObjectKind::LimitRange => "v1",
            ObjectKind::NetworkPolicy | ObjectKind::Ingress => "networking.k8s.io/v1",
            ObjectKind::StatefulSet | ObjectKind::Deployment => "apps/v1",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ObjectKind::Secret => "secrets",
            ObjectKind::Service => "services",
            ObjectKind::ResourceQuota => "resourcequotas",
            ObjectKind::LimitRange => "limitranges",
            ObjectKind::NetworkPolicy => "networkpolicies",
            ObjectKind::StatefulSet => "statefulsets",
            ObjectKind::Deployment => "deployments",
            ObjectKind::Ingress => "ingresses",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workload kinds whose readiness can be observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    StatefulSet,
    Deployment,
}

impl WorkloadKind {
    pub fn object_kind(&self) -> ObjectKind {
        match self {
            WorkloadKind::StatefulSet => ObjectKind::StatefulSet,
            WorkloadKind::Deployment => ObjectKind::Deployment,
        }
    }
}

/// Replica counts reported by the substrate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkloadStatus {
    pub desired: u32,
    pub ready: u32,
}

impl WorkloadStatus {
    pub fn is_ready(&self) -> bool {
        self.ready >= 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceInfo {
    pub name: String,
    pub labels: Labels,
    pub created_at: Option<DateTime<Utc>>,
    pub terminating: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

/// Label selector in `key=value,key=value` form
pub fn label_selector(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Selector matching every namespace this service owns
pub fn ownership_selector() -> Labels {
    Labels::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())])
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Substrate: Send + Sync {
    /// `Ok(None)` when the namespace does not exist
    async fn read_namespace(&self, name: &str) -> Result<Option<NamespaceInfo>, SubstrateError>;

    async fn create_namespace(&self, name: &str, labels: &Labels) -> Result<(), SubstrateError>;

    /// Create a namespaced object from a full manifest
    async fn create_object(
        &self,
        namespace: &str,
        kind: ObjectKind,
        manifest: Value,
    ) -> Result<(), SubstrateError>;

    async fn read_workload_status(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
    ) -> Result<WorkloadStatus, SubstrateError>;

    async fn list_namespaces(&self, selector: &Labels)
        -> Result<Vec<NamespaceInfo>, SubstrateError>;

    /// Cascading delete of a namespace and everything inside it
    async fn delete_namespace(&self, name: &str) -> Result<DeleteOutcome, SubstrateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_selector() {
        let mut labels = ownership_selector();
        labels.insert(ENGINE_LABEL.to_string(), "woocommerce".to_string());
        assert_eq!(
            label_selector(&labels),
            "app.kubernetes.io/managed-by=store-orchestrator,store-orchestrator/engine=woocommerce"
        );
    }

    #[test]
    fn test_workload_ready_needs_one_replica() {
        assert!(!WorkloadStatus { desired: 1, ready: 0 }.is_ready());
        assert!(WorkloadStatus { desired: 1, ready: 1 }.is_ready());
    }
}
