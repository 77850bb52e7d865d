use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::services::StoreOrchestrator;

/// How the caller's rate-limit key is derived
#[derive(Debug, Clone, Copy, Default)]
pub struct OriginPolicy {
    pub trust_forwarded_for: bool,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<StoreOrchestrator>,
    pub origin: OriginPolicy,
}

impl AppState {
    pub fn new(orchestrator: Arc<StoreOrchestrator>, server: &ServerConfig) -> Self {
        Self {
            orchestrator,
            origin: OriginPolicy {
                trust_forwarded_for: server.trust_forwarded_for,
            },
        }
    }
}

impl FromRef<AppState> for Arc<StoreOrchestrator> {
    fn from_ref(state: &AppState) -> Self {
        state.orchestrator.clone()
    }
}

impl FromRef<AppState> for OriginPolicy {
    fn from_ref(state: &AppState) -> Self {
        state.origin
    }
}
