use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub readiness: ReadinessConfig,
    pub ingress: IngressConfig,
    pub tenant: TenantResourcesConfig,
    pub substrate: SubstrateConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Key rate limits on the first `X-Forwarded-For` hop. Only safe behind
    /// a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            trust_forwarded_for: false,
        }
    }
}

/// Admission limits for store creation
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_stores: usize,
    pub max_concurrent_provisions: usize,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_stores: 20,
            max_concurrent_provisions: 5,
            rate_limit_requests: 10,
            rate_limit_window_secs: 60,
        }
    }
}

impl LimitsConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ReadinessConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval_ms: 5_000,
        }
    }
}

impl ReadinessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct IngressConfig {
    /// Stores are exposed as `<namespace>.<domain>`
    pub domain: String,
    pub scheme: String,
    pub class: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            scheme: "http".to_string(),
            class: "nginx".to_string(),
        }
    }
}

/// Per-tenant resource bounds, applied as quota and limit-range objects
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TenantResourcesConfig {
    pub storage_size: String,
    pub quota_cpu: String,
    pub quota_memory: String,
    pub quota_pods: u32,
    pub container_cpu: String,
    pub container_memory: String,
}

impl Default for TenantResourcesConfig {
    fn default() -> Self {
        Self {
            storage_size: "1Gi".to_string(),
            quota_cpu: "2".to_string(),
            quota_memory: "4Gi".to_string(),
            quota_pods: 10,
            container_cpu: "500m".to_string(),
            container_memory: "1Gi".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubstrateMode {
    #[default]
    Kubernetes,
    /// Process-local substrate whose workloads report ready immediately
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SubstrateConfig {
    pub mode: SubstrateMode,
    /// Defaults to the in-cluster service address when unset
    pub api_url: Option<String>,
    pub token_file: Option<String>,
    pub ca_file: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub timeout_secs: u64,
}

impl Default for SubstrateConfig {
    fn default() -> Self {
        Self {
            mode: SubstrateMode::Kubernetes,
            api_url: None,
            token_file: None,
            ca_file: None,
            insecure_skip_tls_verify: false,
            timeout_secs: 30,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
