//! Declarative substrate objects for one store.
//!
//! Every builder is a pure function of the provisioning context. Workloads
//! reference credentials through the tenant secret, never by value.

use serde_json::{json, Value};

use crate::config::{IngressConfig, TenantResourcesConfig};
use crate::models::engine::{EnvSource, EnvVar};
use crate::models::{Credentials, Engine, EngineProfile, TenantId};
use crate::substrate::{Labels, ENGINE_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE, TENANT_ID_LABEL};

const DEFAULT_DENY_POLICY: &str = "default-deny-all";
const APP_TO_DATABASE_POLICY: &str = "allow-app-to-database";
const PUBLIC_TO_APP_POLICY: &str = "allow-public-to-app";
const QUOTA_NAME: &str = "store-quota";
const LIMIT_RANGE_NAME: &str = "store-limits";
const STORAGE_VOLUME: &str = "data";

pub struct ProvisionContext<'a> {
    pub tenant_id: &'a TenantId,
    pub namespace: &'a str,
    pub engine: Engine,
    pub credentials: &'a Credentials,
    pub ingress: &'a IngressConfig,
    pub resources: &'a TenantResourcesConfig,
}

impl ProvisionContext<'_> {
    fn profile(&self) -> &'static EngineProfile {
        self.engine.profile()
    }

    pub fn host(&self) -> String {
        format!("{}.{}", self.namespace, self.ingress.domain)
    }
}

/// Labels carried by every tenant namespace; the reconciler discovers
/// tenants through them.
pub fn namespace_labels(tenant_id: &TenantId, engine: Engine) -> Labels {
    Labels::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (TENANT_ID_LABEL.to_string(), tenant_id.to_string()),
        (ENGINE_LABEL.to_string(), engine.as_str().to_string()),
    ])
}

fn metadata(ctx: &ProvisionContext, name: &str) -> Value {
    json!({
        "name": name,
        "namespace": ctx.namespace,
        "labels": {
            MANAGED_BY_LABEL: MANAGED_BY_VALUE,
            TENANT_ID_LABEL: ctx.tenant_id.as_str(),
        },
    })
}

pub fn resource_quota(ctx: &ProvisionContext) -> Value {
    let r = ctx.resources;
    json!({
        "apiVersion": "v1",
        "kind": "ResourceQuota",
        "metadata": metadata(ctx, QUOTA_NAME),
        "spec": {
            "hard": {
                "requests.cpu": r.quota_cpu,
                "requests.memory": r.quota_memory,
                "limits.cpu": r.quota_cpu,
                "limits.memory": r.quota_memory,
                "pods": r.quota_pods.to_string(),
                "persistentvolumeclaims": "2",
            }
        }
    })
}

pub fn limit_range(ctx: &ProvisionContext) -> Value {
    let r = ctx.resources;
    json!({
        "apiVersion": "v1",
        "kind": "LimitRange",
        "metadata": metadata(ctx, LIMIT_RANGE_NAME),
        "spec": {
            "limits": [{
                "type": "Container",
                "default": { "cpu": r.container_cpu, "memory": r.container_memory },
                "defaultRequest": { "cpu": "100m", "memory": "128Mi" },
            }]
        }
    })
}

pub fn default_deny_policy(ctx: &ProvisionContext) -> Value {
    json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "NetworkPolicy",
        "metadata": metadata(ctx, DEFAULT_DENY_POLICY),
        "spec": {
            "podSelector": {},
            "policyTypes": ["Ingress"],
        }
    })
}

pub fn app_to_database_policy(ctx: &ProvisionContext) -> Value {
    let profile = ctx.profile();
    json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "NetworkPolicy",
        "metadata": metadata(ctx, APP_TO_DATABASE_POLICY),
        "spec": {
            "podSelector": { "matchLabels": { "app": profile.database.name } },
            "policyTypes": ["Ingress"],
            "ingress": [{
                "from": [{ "podSelector": { "matchLabels": { "app": profile.app.name } } }],
                "ports": [{ "protocol": "TCP", "port": profile.database.port }],
            }]
        }
    })
}

pub fn public_to_app_policy(ctx: &ProvisionContext) -> Value {
    let profile = ctx.profile();
    json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "NetworkPolicy",
        "metadata": metadata(ctx, PUBLIC_TO_APP_POLICY),
        "spec": {
            "podSelector": { "matchLabels": { "app": profile.app.name } },
            "policyTypes": ["Ingress"],
            "ingress": [{
                "ports": [{ "protocol": "TCP", "port": profile.app.port }],
            }]
        }
    })
}

pub fn database_secret(ctx: &ProvisionContext) -> Value {
    let profile = ctx.profile();
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": metadata(ctx, profile.secret_name),
        "type": "Opaque",
        "stringData": profile.database.secret_data(ctx.credentials),
    })
}

pub fn database_service(ctx: &ProvisionContext) -> Value {
    let db = &ctx.profile().database;
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": metadata(ctx, db.name),
        "spec": {
            "clusterIP": "None",
            "selector": { "app": db.name },
            "ports": [{ "name": db.name, "port": db.port, "targetPort": db.port }],
        }
    })
}

pub fn database_workload(ctx: &ProvisionContext) -> Value {
    let profile = ctx.profile();
    let db = &profile.database;
    json!({
        "apiVersion": "apps/v1",
        "kind": "StatefulSet",
        "metadata": metadata(ctx, db.name),
        "spec": {
            "serviceName": db.name,
            "replicas": 1,
            "selector": { "matchLabels": { "app": db.name } },
            "template": {
                "metadata": { "labels": { "app": db.name } },
                "spec": {
                    "containers": [{
                        "name": db.name,
                        "image": db.image,
                        "envFrom": [{ "secretRef": { "name": profile.secret_name } }],
                        "ports": [{ "containerPort": db.port }],
                        "volumeMounts": [{ "name": STORAGE_VOLUME, "mountPath": db.data_path }],
                    }]
                }
            },
            "volumeClaimTemplates": [{
                "metadata": { "name": STORAGE_VOLUME },
                "spec": {
                    "accessModes": ["ReadWriteOnce"],
                    "resources": { "requests": { "storage": ctx.resources.storage_size } },
                }
            }]
        }
    })
}

fn env_var(secret_name: &str, var: &EnvVar) -> Value {
    match var.source {
        EnvSource::Literal(value) => json!({ "name": var.name, "value": value }),
        EnvSource::SecretKey(key) => json!({
            "name": var.name,
            "valueFrom": { "secretKeyRef": { "name": secret_name, "key": key } },
        }),
    }
}

pub fn app_service(ctx: &ProvisionContext) -> Value {
    let app = &ctx.profile().app;
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": metadata(ctx, app.name),
        "spec": {
            "type": "ClusterIP",
            "selector": { "app": app.name },
            "ports": [{ "name": "http", "port": 80, "targetPort": app.port }],
        }
    })
}

pub fn app_workload(ctx: &ProvisionContext) -> Value {
    let profile = ctx.profile();
    let app = &profile.app;
    let env: Vec<Value> = app
        .env
        .iter()
        .map(|var| env_var(profile.secret_name, var))
        .collect();

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": metadata(ctx, app.name),
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": app.name } },
            "template": {
                "metadata": { "labels": { "app": app.name } },
                "spec": {
                    "containers": [{
                        "name": app.name,
                        "image": app.image,
                        "env": env,
                        "ports": [{ "containerPort": app.port }],
                        "readinessProbe": {
                            "tcpSocket": { "port": app.port },
                            "initialDelaySeconds": 10,
                            "periodSeconds": 5,
                        },
                    }]
                }
            }
        }
    })
}

pub fn ingress(ctx: &ProvisionContext) -> Value {
    let app = &ctx.profile().app;
    json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": metadata(ctx, app.name),
        "spec": {
            "ingressClassName": ctx.ingress.class,
            "rules": [{
                "host": ctx.host(),
                "http": {
                    "paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": { "service": { "name": app.name, "port": { "number": 80 } } },
                    }]
                }
            }]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_ctx<R>(f: impl FnOnce(&ProvisionContext) -> R) -> (R, Credentials) {
        let id = TenantId::from("abcd1234");
        let ns = id.namespace();
        let credentials = Credentials::generate();
        let ingress = IngressConfig::default();
        let resources = TenantResourcesConfig::default();
        let ctx = ProvisionContext {
            tenant_id: &id,
            namespace: &ns,
            engine: Engine::Woocommerce,
            credentials: &credentials,
            ingress: &ingress,
            resources: &resources,
        };
        (f(&ctx), credentials.clone())
    }

    #[test]
    fn test_app_workload_never_embeds_credentials() {
        let (manifest, credentials) = with_ctx(app_workload);
        let text = manifest.to_string();
        assert!(!text.contains(&credentials.password));
        assert!(!text.contains(&credentials.root_password));

        let env = manifest["spec"]["template"]["spec"]["containers"][0]["env"]
            .as_array()
            .unwrap();
        let password = env
            .iter()
            .find(|e| e["name"] == "WORDPRESS_DB_PASSWORD")
            .unwrap();
        assert_eq!(
            password["valueFrom"]["secretKeyRef"]["name"],
            "mysql-secret"
        );
        assert!(password.get("value").is_none());
    }

    #[test]
    fn test_secret_holds_credentials() {
        let (manifest, credentials) = with_ctx(database_secret);
        assert_eq!(manifest["stringData"]["MYSQL_PASSWORD"], credentials.password);
        assert_eq!(manifest["metadata"]["namespace"], "store-abcd1234");
    }

    #[test]
    fn test_database_uses_secret_reference_and_storage() {
        let (manifest, _) = with_ctx(database_workload);
        let container = &manifest["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["envFrom"][0]["secretRef"]["name"], "mysql-secret");
        assert!(container.get("env").is_none());
        assert_eq!(manifest["spec"]["replicas"], 1);
        assert_eq!(
            manifest["spec"]["volumeClaimTemplates"][0]["spec"]["resources"]["requests"]["storage"],
            "1Gi"
        );
    }

    #[test]
    fn test_database_service_is_headless() {
        let (manifest, _) = with_ctx(database_service);
        assert_eq!(manifest["spec"]["clusterIP"], "None");
        assert_eq!(manifest["spec"]["ports"][0]["port"], 3306);
    }

    #[test]
    fn test_policies() {
        let (deny, _) = with_ctx(default_deny_policy);
        assert_eq!(deny["spec"]["podSelector"], json!({}));

        let (allow, _) = with_ctx(app_to_database_policy);
        assert_eq!(allow["spec"]["podSelector"]["matchLabels"]["app"], "mysql");
        assert_eq!(
            allow["spec"]["ingress"][0]["from"][0]["podSelector"]["matchLabels"]["app"],
            "wordpress"
        );
    }

    #[test]
    fn test_ingress_host() {
        let (manifest, _) = with_ctx(ingress);
        assert_eq!(manifest["spec"]["rules"][0]["host"], "store-abcd1234.localhost");
        assert_eq!(manifest["spec"]["ingressClassName"], "nginx");
    }

    #[test]
    fn test_namespace_labels() {
        let labels = namespace_labels(&TenantId::from("abcd1234"), Engine::Woocommerce);
        assert_eq!(labels[TENANT_ID_LABEL], "abcd1234");
        assert_eq!(labels[MANAGED_BY_LABEL], MANAGED_BY_VALUE);
        assert_eq!(labels[ENGINE_LABEL], "woocommerce");
    }
}
