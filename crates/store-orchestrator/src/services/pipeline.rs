use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::manifests::{self, ProvisionContext};
use crate::config::{IngressConfig, TenantResourcesConfig};
use crate::models::{store_url, Credentials, Engine, Tenant, TenantId, TenantStatus};
use crate::registry::TenantRegistry;
use crate::substrate::{ObjectKind, Substrate, SubstrateError};

/// Name reported when the existence check itself fails
pub const DUPLICATE_CHECK: &str = "duplicate-check";

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Namespace {0} already exists")]
    Conflict(String),

    #[error("Provisioning step {step} failed: {source}")]
    StepFailed {
        step: &'static str,
        #[source]
        source: SubstrateError,
    },
}

/// One resource-creation step of a store's stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    Namespace,
    ResourceQuota,
    LimitRange,
    DefaultDenyPolicy,
    AllowAppToDatabasePolicy,
    AllowPublicToAppPolicy,
    DatabaseSecret,
    DatabaseService,
    DatabaseWorkload,
    AppService,
    AppWorkload,
    Ingress,
}

impl ProvisionStep {
    pub fn name(&self) -> &'static str {
        match self {
            ProvisionStep::Namespace => "namespace",
            ProvisionStep::ResourceQuota => "resource-quota",
            ProvisionStep::LimitRange => "limit-range",
            ProvisionStep::DefaultDenyPolicy => "default-deny-policy",
            ProvisionStep::AllowAppToDatabasePolicy => "app-to-database-policy",
            ProvisionStep::AllowPublicToAppPolicy => "public-to-app-policy",
            ProvisionStep::DatabaseSecret => "database-secret",
            ProvisionStep::DatabaseService => "database-service",
            ProvisionStep::DatabaseWorkload => "database-workload",
            ProvisionStep::AppService => "app-service",
            ProvisionStep::AppWorkload => "app-workload",
            ProvisionStep::Ingress => "ingress",
        }
    }

    /// Kind and manifest of a namespaced object. `None` for the namespace.
    fn object(&self, ctx: &ProvisionContext) -> Option<(ObjectKind, Value)> {
        let object = match self {
            ProvisionStep::Namespace => return None,
            ProvisionStep::ResourceQuota => (ObjectKind::ResourceQuota, manifests::resource_quota(ctx)),
            ProvisionStep::LimitRange => (ObjectKind::LimitRange, manifests::limit_range(ctx)),
            ProvisionStep::DefaultDenyPolicy => {
                (ObjectKind::NetworkPolicy, manifests::default_deny_policy(ctx))
            }
            ProvisionStep::AllowAppToDatabasePolicy => {
                (ObjectKind::NetworkPolicy, manifests::app_to_database_policy(ctx))
            }
            ProvisionStep::AllowPublicToAppPolicy => {
                (ObjectKind::NetworkPolicy, manifests::public_to_app_policy(ctx))
            }
            ProvisionStep::DatabaseSecret => (ObjectKind::Secret, manifests::database_secret(ctx)),
            ProvisionStep::DatabaseService => (ObjectKind::Service, manifests::database_service(ctx)),
            ProvisionStep::DatabaseWorkload => {
                (ObjectKind::StatefulSet, manifests::database_workload(ctx))
            }
            ProvisionStep::AppService => (ObjectKind::Service, manifests::app_service(ctx)),
            ProvisionStep::AppWorkload => (ObjectKind::Deployment, manifests::app_workload(ctx)),
            ProvisionStep::Ingress => (ObjectKind::Ingress, manifests::ingress(ctx)),
        };
        Some(object)
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Creates a store's whole resource bundle, step by step.
///
/// The registry record is inserted as `Provisioning` right after the
/// namespace exists. A later step failure rolls the store back by deleting
/// its namespace; if that delete fails too, the record is kept as `Failed`
/// so the store can be deleted again by hand.
pub struct ProvisioningPipeline {
    substrate: Arc<dyn Substrate>,
    registry: TenantRegistry,
    ingress: IngressConfig,
    resources: TenantResourcesConfig,
}

impl ProvisioningPipeline {
    pub fn new(
        substrate: Arc<dyn Substrate>,
        registry: TenantRegistry,
        ingress: IngressConfig,
        resources: TenantResourcesConfig,
    ) -> Self {
        Self {
            substrate,
            registry,
            ingress,
            resources,
        }
    }

    pub fn store_url(&self, namespace: &str) -> String {
        store_url(&self.ingress.scheme, namespace, &self.ingress.domain)
    }

    pub async fn provision(&self, id: TenantId, engine: Engine) -> Result<Tenant, ProvisionError> {
        let namespace = id.namespace();

        match self.substrate.read_namespace(&namespace).await {
            Ok(None) => {}
            Ok(Some(_)) => return Err(ProvisionError::Conflict(namespace)),
            Err(source) => {
                return Err(ProvisionError::StepFailed {
                    step: DUPLICATE_CHECK,
                    source,
                })
            }
        }

        let credentials = Credentials::generate();
        let ctx = ProvisionContext {
            tenant_id: &id,
            namespace: &namespace,
            engine,
            credentials: &credentials,
            ingress: &self.ingress,
            resources: &self.resources,
        };

        let record = Tenant::new(id.clone(), engine, self.store_url(&namespace), Utc::now());
        let mut registered = false;
        for step in engine.steps() {
            debug!(store_id = %id, step = step.name(), "running provisioning step");

            if let Err(source) = self.run_step(*step, &ctx).await {
                error!(store_id = %id, step = step.name(), error = %source, "provisioning step failed");
                if registered {
                    self.roll_back(&id, &namespace, step.name(), &source).await;
                }
                return Err(ProvisionError::StepFailed {
                    step: step.name(),
                    source,
                });
            }

            if *step == ProvisionStep::Namespace {
                if let Err(e) = self.registry.insert(record.clone()) {
                    warn!(store_id = %id, error = %e, "id reused within process lifetime");
                    if let Err(e) = self.substrate.delete_namespace(&namespace).await {
                        error!(namespace = %namespace, error = %e, "failed to remove namespace");
                    }
                    return Err(ProvisionError::Conflict(namespace));
                }
                registered = true;
            }
        }

        info!(store_id = %id, namespace = %namespace, engine = %engine, "store provisioned");
        // A concurrent delete may already have moved the record on
        Ok(self.registry.get(&id).unwrap_or(record))
    }

    async fn run_step(&self, step: ProvisionStep, ctx: &ProvisionContext<'_>) -> Result<(), SubstrateError> {
        match step.object(ctx) {
            None => {
                let labels = manifests::namespace_labels(ctx.tenant_id, ctx.engine);
                self.substrate.create_namespace(ctx.namespace, &labels).await
            }
            Some((kind, manifest)) => {
                self.substrate
                    .create_object(ctx.namespace, kind, manifest)
                    .await
            }
        }
    }

    async fn roll_back(&self, id: &TenantId, namespace: &str, step: &str, cause: &SubstrateError) {
        match self.substrate.delete_namespace(namespace).await {
            Ok(_) => {
                self.registry.discard(id);
                warn!(store_id = %id, namespace, "rolled back partially provisioned store");
            }
            Err(e) => {
                error!(store_id = %id, namespace, error = %e, "rollback failed, store left behind");
                let reason = format!(
                    "provisioning failed at {}: {}; rollback failed: {}",
                    step, cause, e
                );
                self.registry.transition(id, TenantStatus::Failed, Some(reason));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::{InMemorySubstrate, MockSubstrate, ENGINE_LABEL, TENANT_ID_LABEL};

    fn pipeline(substrate: Arc<dyn Substrate>, registry: TenantRegistry) -> ProvisioningPipeline {
        ProvisioningPipeline::new(
            substrate,
            registry,
            IngressConfig::default(),
            TenantResourcesConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_provision_creates_full_bundle() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let registry = TenantRegistry::new();
        let pipeline = pipeline(substrate.clone(), registry.clone());

        let tenant = pipeline
            .provision(TenantId::from("abcd1234"), Engine::Woocommerce)
            .await
            .unwrap();

        assert_eq!(tenant.status, TenantStatus::Provisioning);
        assert_eq!(tenant.namespace, "store-abcd1234");
        assert_eq!(tenant.url, "http://store-abcd1234.localhost");
        assert_eq!(registry.len(), 1);

        // Every step except the namespace creates one object
        assert_eq!(
            substrate.object_count("store-abcd1234"),
            Engine::Woocommerce.steps().len() - 1
        );
        assert!(substrate
            .object("store-abcd1234", ObjectKind::StatefulSet, "mysql")
            .is_some());
        assert!(substrate
            .object("store-abcd1234", ObjectKind::Ingress, "wordpress")
            .is_some());

        let ns = substrate.read_namespace("store-abcd1234").await.unwrap().unwrap();
        assert_eq!(ns.labels[TENANT_ID_LABEL], "abcd1234");
        assert_eq!(ns.labels[ENGINE_LABEL], "woocommerce");
    }

    #[tokio::test]
    async fn test_secret_never_reaches_app_configuration() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let pipeline = pipeline(substrate.clone(), TenantRegistry::new());
        pipeline
            .provision(TenantId::from("abcd1234"), Engine::Woocommerce)
            .await
            .unwrap();

        let secret = substrate
            .object("store-abcd1234", ObjectKind::Secret, "mysql-secret")
            .unwrap();
        let password = secret["stringData"]["MYSQL_PASSWORD"].as_str().unwrap().to_string();
        let app = substrate
            .object("store-abcd1234", ObjectKind::Deployment, "wordpress")
            .unwrap();
        assert!(!app.to_string().contains(&password));
    }

    #[tokio::test]
    async fn test_existing_namespace_conflicts() {
        let substrate = Arc::new(InMemorySubstrate::new());
        substrate.seed_namespace("store-abcd1234", Default::default());
        let registry = TenantRegistry::new();
        let pipeline = pipeline(substrate.clone(), registry.clone());

        let err = pipeline
            .provision(TenantId::from("abcd1234"), Engine::Woocommerce)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Conflict(ref ns) if ns == "store-abcd1234"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_failed_step_rolls_back() {
        let substrate = Arc::new(InMemorySubstrate::new());
        substrate.fail_on(Some(ObjectKind::StatefulSet));
        let registry = TenantRegistry::new();
        let pipeline = pipeline(substrate.clone(), registry.clone());

        let err = pipeline
            .provision(TenantId::from("abcd1234"), Engine::Woocommerce)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::StepFailed { step: "database-workload", .. }
        ));
        assert!(registry.is_empty());
        assert!(!substrate.has_namespace("store-abcd1234"));
    }

    #[tokio::test]
    async fn test_failed_rollback_leaves_failed_record() {
        let substrate = Arc::new(InMemorySubstrate::new());
        substrate.fail_on(Some(ObjectKind::Ingress));
        substrate.set_fail_delete(true);
        let registry = TenantRegistry::new();
        let pipeline = pipeline(substrate.clone(), registry.clone());

        pipeline
            .provision(TenantId::from("abcd1234"), Engine::Woocommerce)
            .await
            .unwrap_err();

        let tenant = registry.get(&TenantId::from("abcd1234")).unwrap();
        assert_eq!(tenant.status, TenantStatus::Failed);
        let reason = tenant.failure_reason.unwrap();
        assert!(reason.contains("ingress"));
        assert!(reason.contains("rollback failed"));
    }

    #[tokio::test]
    async fn test_namespace_failure_needs_no_rollback() {
        let mut mock = MockSubstrate::new();
        mock.expect_read_namespace().returning(|_| Ok(None));
        mock.expect_create_namespace()
            .returning(|_, _| Err(SubstrateError::Unreachable("timeout".into())));
        mock.expect_delete_namespace().never();

        let registry = TenantRegistry::new();
        let pipeline = pipeline(Arc::new(mock), registry.clone());
        let err = pipeline
            .provision(TenantId::from("abcd1234"), Engine::Woocommerce)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::StepFailed { step: "namespace", .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_namespace_aborts_before_creating() {
        let mut mock = MockSubstrate::new();
        mock.expect_read_namespace()
            .returning(|_| Err(SubstrateError::Unreachable("refused".into())));
        mock.expect_create_namespace().never();

        let pipeline = pipeline(Arc::new(mock), TenantRegistry::new());
        let err = pipeline
            .provision(TenantId::from("abcd1234"), Engine::Woocommerce)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::StepFailed { step: DUPLICATE_CHECK, .. }));
    }
}
