use axum::{routing::get, Router};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/stores",
            get(handlers::stores::list_stores).post(handlers::stores::create_store),
        )
        .route(
            "/stores/{id}",
            get(handlers::stores::get_store).delete(handlers::stores::delete_store),
        )
        .route("/metrics", get(handlers::metrics::metrics_handler))
        .route("/activity", get(handlers::activity::activity_handler))
        .with_state(state)
        // CORS
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Tracing
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
}
