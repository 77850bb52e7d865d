use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{
    label_selector, DeleteOutcome, Labels, NamespaceInfo, ObjectKind, Substrate, SubstrateError,
    WorkloadKind, WorkloadStatus,
};
use crate::config::SubstrateConfig;

const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ObjectMeta {
    name: String,
    labels: Labels,
    creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct NamespaceStatus {
    phase: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamespaceObject {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    status: NamespaceStatus,
}

#[derive(Debug, Deserialize)]
struct NamespaceList {
    #[serde(default)]
    items: Vec<NamespaceObject>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct WorkloadSpec {
    replicas: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct WorkloadObjectStatus {
    ready_replicas: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WorkloadObject {
    #[serde(default)]
    spec: WorkloadSpec,
    #[serde(default)]
    status: WorkloadObjectStatus,
}

impl From<NamespaceObject> for NamespaceInfo {
    fn from(ns: NamespaceObject) -> Self {
        NamespaceInfo {
            name: ns.metadata.name,
            labels: ns.metadata.labels,
            created_at: ns.metadata.creation_timestamp,
            terminating: ns.status.phase.as_deref() == Some("Terminating"),
        }
    }
}

/// Kubernetes API server adapter speaking plain REST over reqwest
#[derive(Clone)]
pub struct KubeSubstrate {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl KubeSubstrate {
    /// Resolve the API server address and credentials.
    ///
    /// Without an explicit `api_url` the in-cluster service environment and
    /// the mounted service account are used.
    pub fn from_config(cfg: &SubstrateConfig) -> Result<Self> {
        let api_url = match &cfg.api_url {
            Some(url) => url.clone(),
            None => {
                let host = std::env::var("KUBERNETES_SERVICE_HOST")
                    .context("substrate.api_url unset and KUBERNETES_SERVICE_HOST missing")?;
                let port =
                    std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
                format!("https://{}:{}", host, port)
            }
        };
        let base_url = Url::parse(&api_url).context("invalid substrate.api_url")?;

        let token_file = cfg.token_file.as_deref().unwrap_or(SERVICE_ACCOUNT_TOKEN);
        let token = match std::fs::read_to_string(token_file) {
            Ok(t) => Some(t.trim().to_string()),
            Err(e) if cfg.token_file.is_some() => {
                return Err(e).with_context(|| format!("failed to read token {}", token_file));
            }
            Err(_) => None,
        };

        let mut builder = Client::builder().timeout(Duration::from_secs(cfg.timeout_secs.max(1)));

        let ca_file = cfg.ca_file.as_deref().unwrap_or(SERVICE_ACCOUNT_CA);
        match std::fs::read(ca_file) {
            Ok(pem) => {
                let cert = reqwest::Certificate::from_pem(&pem)
                    .with_context(|| format!("invalid CA bundle {}", ca_file))?;
                builder = builder.add_root_certificate(cert);
            }
            Err(e) if cfg.ca_file.is_some() => {
                return Err(e).with_context(|| format!("failed to read CA bundle {}", ca_file));
            }
            Err(_) => {}
        }
        if cfg.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            client: builder.build().context("failed to build substrate client")?,
            base_url,
            token,
        })
    }

    fn url(&self, path: &str) -> Result<Url, SubstrateError> {
        self.base_url
            .join(path)
            .map_err(|e| SubstrateError::Decode(format!("bad path {}: {}", path, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let req = self.client.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, SubstrateError> {
        req.send()
            .await
            .map_err(|e| SubstrateError::Unreachable(e.to_string()))
    }

    fn object_path(namespace: &str, kind: ObjectKind) -> String {
        let prefix = match kind.api_version() {
            "v1" => "/api/v1".to_string(),
            group => format!("/apis/{}", group),
        };
        format!("{}/namespaces/{}/{}", prefix, namespace, kind.plural())
    }
}

/// Map a non-success response to a substrate error
async fn api_error(response: Response, kind: &'static str, name: &str) -> SubstrateError {
    let status = response.status();
    match status {
        StatusCode::NOT_FOUND => SubstrateError::NotFound {
            kind,
            name: name.to_string(),
        },
        StatusCode::CONFLICT => SubstrateError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        _ => {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["message"].as_str().map(str::to_string))
                .unwrap_or(body);
            SubstrateError::Api {
                status: status.as_u16(),
                message,
            }
        }
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, SubstrateError> {
    response
        .json::<T>()
        .await
        .map_err(|e| SubstrateError::Decode(e.to_string()))
}

#[async_trait]
impl Substrate for KubeSubstrate {
    async fn read_namespace(&self, name: &str) -> Result<Option<NamespaceInfo>, SubstrateError> {
        let url = self.url(&format!("/api/v1/namespaces/{}", name))?;
        let response = self.send(self.request(Method::GET, url)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(api_error(response, "Namespace", name).await);
        }
        let ns: NamespaceObject = decode(response).await?;
        Ok(Some(ns.into()))
    }

    async fn create_namespace(&self, name: &str, labels: &Labels) -> Result<(), SubstrateError> {
        let url = self.url("/api/v1/namespaces")?;
        let body = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name, "labels": labels },
        });
        let response = self
            .send(self.request(Method::POST, url).json(&body))
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response, "Namespace", name).await);
        }
        debug!(namespace = name, "namespace created");
        Ok(())
    }

    async fn create_object(
        &self,
        namespace: &str,
        kind: ObjectKind,
        manifest: Value,
    ) -> Result<(), SubstrateError> {
        let name = manifest["metadata"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let url = self.url(&Self::object_path(namespace, kind))?;
        let response = self
            .send(self.request(Method::POST, url).json(&manifest))
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response, kind.as_str(), &name).await);
        }
        debug!(namespace, kind = kind.as_str(), name = %name, "object created");
        Ok(())
    }

    async fn read_workload_status(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
    ) -> Result<WorkloadStatus, SubstrateError> {
        let object_kind = kind.object_kind();
        let url = self.url(&format!(
            "{}/{}",
            Self::object_path(namespace, object_kind),
            name
        ))?;
        let response = self.send(self.request(Method::GET, url)).await?;

        if !response.status().is_success() {
            return Err(api_error(response, object_kind.as_str(), name).await);
        }
        let workload: WorkloadObject = decode(response).await?;
        Ok(WorkloadStatus {
            desired: workload.spec.replicas.unwrap_or(1),
            ready: workload.status.ready_replicas.unwrap_or(0),
        })
    }

    async fn list_namespaces(
        &self,
        selector: &Labels,
    ) -> Result<Vec<NamespaceInfo>, SubstrateError> {
        let mut url = self.url("/api/v1/namespaces")?;
        if !selector.is_empty() {
            url.query_pairs_mut()
                .append_pair("labelSelector", &label_selector(selector));
        }
        let response = self.send(self.request(Method::GET, url)).await?;

        if !response.status().is_success() {
            return Err(api_error(response, "Namespace", "*").await);
        }
        let list: NamespaceList = decode(response).await?;
        Ok(list.items.into_iter().map(NamespaceInfo::from).collect())
    }

    async fn delete_namespace(&self, name: &str) -> Result<DeleteOutcome, SubstrateError> {
        let url = self.url(&format!("/api/v1/namespaces/{}", name))?;
        let body = json!({
            "apiVersion": "v1",
            "kind": "DeleteOptions",
            "propagationPolicy": "Background",
        });
        let response = self
            .send(self.request(Method::DELETE, url).json(&body))
            .await?;

        match response.status() {
            s if s.is_success() => Ok(DeleteOutcome::Deleted),
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::AlreadyAbsent),
            // Already terminating; the API server finishes the purge
            StatusCode::CONFLICT => {
                debug!(namespace = name, "namespace already terminating");
                Ok(DeleteOutcome::AlreadyAbsent)
            }
            _ => Err(api_error(response, "Namespace", name).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::ownership_selector;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn substrate_for(server: &MockServer) -> KubeSubstrate {
        let cfg = SubstrateConfig {
            api_url: Some(server.uri()),
            ..SubstrateConfig::default()
        };
        KubeSubstrate::from_config(&cfg).unwrap()
    }

    #[tokio::test]
    async fn test_read_namespace_maps_missing_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/store-gone0000"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/store-abcd1234"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "metadata": {
                    "name": "store-abcd1234",
                    "labels": { "app.kubernetes.io/managed-by": "store-orchestrator" }
                },
                "status": { "phase": "Active" }
            })))
            .mount(&server)
            .await;

        let substrate = substrate_for(&server).await;
        assert!(substrate.read_namespace("store-gone0000").await.unwrap().is_none());

        let ns = substrate.read_namespace("store-abcd1234").await.unwrap().unwrap();
        assert_eq!(ns.name, "store-abcd1234");
        assert!(!ns.terminating);
        assert_eq!(ns.labels.len(), 1);
    }

    #[tokio::test]
    async fn test_read_namespace_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/store-abcd1234"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({ "message": "forbidden: no access" })),
            )
            .mount(&server)
            .await;

        let err = substrate_for(&server)
            .await
            .read_namespace("store-abcd1234")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SubstrateError::Api {
                status: 403,
                message: "forbidden: no access".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_delete_namespace_outcomes() {
        let server = MockServer::start().await;
        let cases = [
            ("store-live0000", 200),
            ("store-gone0000", 404),
            ("store-term0000", 409),
            ("store-boom0000", 500),
        ];
        for (ns, status) in cases {
            Mock::given(method("DELETE"))
                .and(path(format!("/api/v1/namespaces/{}", ns)))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
        }

        let substrate = substrate_for(&server).await;
        assert_eq!(
            substrate.delete_namespace("store-live0000").await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            substrate.delete_namespace("store-gone0000").await.unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
        assert_eq!(
            substrate.delete_namespace("store-term0000").await.unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
        assert!(matches!(
            substrate.delete_namespace("store-boom0000").await,
            Err(SubstrateError::Api { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_create_conflict_is_already_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let err = substrate_for(&server)
            .await
            .create_namespace("store-abcd1234", &ownership_selector())
            .await
            .unwrap_err();
        assert!(matches!(err, SubstrateError::AlreadyExists { kind: "Namespace", .. }));
    }

    #[tokio::test]
    async fn test_read_workload_status_decodes_replicas() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/apps/v1/namespaces/store-abcd1234/statefulsets/mysql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spec": { "replicas": 1 },
                "status": { "replicas": 1, "readyReplicas": 1 }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/apis/apps/v1/namespaces/store-abcd1234/deployments/wordpress"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spec": { "replicas": 2 },
                "status": {}
            })))
            .mount(&server)
            .await;

        let substrate = substrate_for(&server).await;
        let db = substrate
            .read_workload_status("store-abcd1234", WorkloadKind::StatefulSet, "mysql")
            .await
            .unwrap();
        assert_eq!(db, WorkloadStatus { desired: 1, ready: 1 });

        let app = substrate
            .read_workload_status("store-abcd1234", WorkloadKind::Deployment, "wordpress")
            .await
            .unwrap();
        assert_eq!(app, WorkloadStatus { desired: 2, ready: 0 });

        let missing = substrate
            .read_workload_status("store-abcd1234", WorkloadKind::Deployment, "other")
            .await
            .unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_list_namespaces_sends_label_selector() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces"))
            .and(query_param(
                "labelSelector",
                "app.kubernetes.io/managed-by=store-orchestrator",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    { "metadata": { "name": "store-abcd1234" }, "status": { "phase": "Active" } },
                    { "metadata": { "name": "store-dead0000" }, "status": { "phase": "Terminating" } }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let namespaces = substrate_for(&server)
            .await
            .list_namespaces(&ownership_selector())
            .await
            .unwrap();
        assert_eq!(namespaces.len(), 2);
        assert!(namespaces[1].terminating);
    }

    #[test]
    fn test_object_paths() {
        assert_eq!(
            KubeSubstrate::object_path("store-a", ObjectKind::Secret),
            "/api/v1/namespaces/store-a/secrets"
        );
        assert_eq!(
            KubeSubstrate::object_path("store-a", ObjectKind::StatefulSet),
            "/apis/apps/v1/namespaces/store-a/statefulsets"
        );
        assert_eq!(
            KubeSubstrate::object_path("store-a", ObjectKind::NetworkPolicy),
            "/apis/networking.k8s.io/v1/namespaces/store-a/networkpolicies"
        );
    }

    #[test]
    fn test_decode_namespace_list() {
        let body = r#"{
            "items": [
                {
                    "metadata": {
                        "name": "store-abcd1234",
                        "labels": { "app.kubernetes.io/managed-by": "store-orchestrator" },
                        "creationTimestamp": "2024-05-01T10:00:00Z"
                    },
                    "status": { "phase": "Active" }
                },
                {
                    "metadata": { "name": "store-dead0000" },
                    "status": { "phase": "Terminating" }
                }
            ]
        }"#;
        let list: NamespaceList = serde_json::from_str(body).unwrap();
        let infos: Vec<NamespaceInfo> = list.items.into_iter().map(Into::into).collect();

        assert_eq!(infos[0].name, "store-abcd1234");
        assert!(infos[0].created_at.is_some());
        assert!(!infos[0].terminating);
        assert!(infos[1].labels.is_empty());
        assert!(infos[1].terminating);
    }

    #[test]
    fn test_decode_workload_without_status() {
        let workload: WorkloadObject =
            serde_json::from_str(r#"{ "spec": { "replicas": 1 } }"#).unwrap();
        assert_eq!(workload.spec.replicas, Some(1));
        assert_eq!(workload.status.ready_replicas, None);
    }

    #[test]
    fn test_explicit_api_url() {
        let cfg = SubstrateConfig {
            api_url: Some("http://127.0.0.1:8001".to_string()),
            ..SubstrateConfig::default()
        };
        let substrate = KubeSubstrate::from_config(&cfg).unwrap();
        assert_eq!(
            substrate.url("/api/v1/namespaces").unwrap().as_str(),
            "http://127.0.0.1:8001/api/v1/namespaces"
        );
    }
}
