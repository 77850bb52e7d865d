use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use store_orchestrator::config::{Settings, SubstrateMode};
use store_orchestrator::routes::build_router;
use store_orchestrator::services::StoreOrchestrator;
use store_orchestrator::state::AppState;
use store_orchestrator::substrate::{InMemorySubstrate, KubeSubstrate, Substrate};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,store_orchestrator=debug".to_string()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Starting store orchestrator...");

    let settings = Settings::load()?;
    info!(
        max_stores = settings.limits.max_stores,
        max_concurrent_provisions = settings.limits.max_concurrent_provisions,
        mode = ?settings.substrate.mode,
        trust_forwarded_for = settings.server.trust_forwarded_for,
        "Configuration loaded"
    );

    let substrate: Arc<dyn Substrate> = match settings.substrate.mode {
        SubstrateMode::Kubernetes => Arc::new(KubeSubstrate::from_config(&settings.substrate)?),
        SubstrateMode::Memory => {
            warn!("Using in-memory substrate; stores exist only inside this process");
            Arc::new(InMemorySubstrate::auto_ready())
        }
    };

    let orchestrator = Arc::new(StoreOrchestrator::new(substrate, &settings));

    match orchestrator.reconcile().await {
        Ok(report) => info!(stores = report.total(), "Registry reconciled"),
        Err(e) => warn!(error = %e, "Reconciliation failed, starting with an empty registry"),
    }

    let app = build_router(AppState::new(orchestrator.clone(), &settings.server));

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    orchestrator.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
