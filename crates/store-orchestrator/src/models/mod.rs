pub mod engine;
pub mod tenant;

pub use engine::{Credentials, Engine, EngineProfile, EnvSource, UnknownEngine};
pub use tenant::{store_url, Tenant, TenantId, TenantStatus, NAMESPACE_PREFIX};
