pub mod settings;

pub use settings::{
    IngressConfig, LimitsConfig, ReadinessConfig, ServerConfig, Settings, SubstrateConfig,
    SubstrateMode, TenantResourcesConfig,
};
