use axum::{
    body::Bytes,
    extract::{ConnectInfo, FromRef, FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::models::{Tenant, TenantId};
use crate::services::{Deletion, StoreOrchestrator};
use crate::state::OriginPolicy;
use crate::utils::error::ApiError;

const UNKNOWN_ORIGIN: &str = "unknown";

#[derive(Debug, Default, Deserialize)]
pub struct CreateStoreRequest {
    pub engine: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteStoreResponse {
    pub message: String,
}

/// Rate-limit key of the caller: the peer address, or the first
/// `X-Forwarded-For` hop when [`OriginPolicy::trust_forwarded_for`] is set
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOrigin(pub String);

impl<S> FromRequestParts<S> for ClientOrigin
where
    S: Send + Sync,
    OriginPolicy: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if OriginPolicy::from_ref(state).trust_forwarded_for {
            let forwarded = parts
                .headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(addr) = forwarded {
                return Ok(ClientOrigin(addr.to_string()));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(ClientOrigin(peer.unwrap_or_else(|| UNKNOWN_ORIGIN.to_string())))
    }
}

pub async fn list_stores(State(orchestrator): State<Arc<StoreOrchestrator>>) -> Json<Vec<Tenant>> {
    Json(orchestrator.list())
}

pub async fn get_store(
    State(orchestrator): State<Arc<StoreOrchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<Tenant>, ApiError> {
    let tenant = orchestrator.get(&TenantId::new(id))?;
    Ok(Json(tenant))
}

/// Body is optional; `{}` or nothing selects the default engine
pub async fn create_store(
    State(orchestrator): State<Arc<StoreOrchestrator>>,
    ClientOrigin(origin): ClientOrigin,
    body: Bytes,
) -> Result<(StatusCode, Json<Tenant>), ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CreateStoreRequest::default()
    } else {
        serde_json::from_slice::<CreateStoreRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?
    };

    info!(origin = %origin, engine = ?request.engine, "store creation requested");
    let tenant = orchestrator
        .create(&origin, request.engine.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

pub async fn delete_store(
    State(orchestrator): State<Arc<StoreOrchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteStoreResponse>, ApiError> {
    let id = TenantId::new(id);
    let message = match orchestrator.delete(&id).await? {
        Deletion::Removed => format!("Store {} deleted", id),
        Deletion::AlreadyGone => format!("Store {} already deleted", id),
    };
    Ok(Json(DeleteStoreResponse { message }))
}
