//! API module for the isolation plane

pub mod error;
pub mod handlers;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Readiness check response
#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub issuer: String,
    pub audience: String,
    pub bucket: String,
    pub signing_kid: String,
    pub trusted_key_count: usize,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Readiness check endpoint
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    let bucket_ready = state
        .store
        .has_bucket(&state.config.bucket_name)
        .await
        .unwrap_or(false);

    Json(ReadyResponse {
        ready: bucket_ready,
        issuer: state.exchange.anchor().issuer().to_string(),
        audience: state.exchange.anchor().audience().to_string(),
        bucket: state.config.bucket_name.clone(),
        signing_kid: state.registry.kid().to_string(),
        trusted_key_count: state.registry.trusted_count(),
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration for browser clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Federation entry
        .route("/v1/credentials/exchange", post(handlers::exchange_credentials))
        // Object access
        .route(
            "/v1/buckets/{bucket}/objects/{*key}",
            get(handlers::get_object).put(handlers::put_object),
        )
        // Deployment documents
        .route("/v1/policy", get(handlers::get_policy))
        .route("/v1/infrastructure", get(handlers::get_infrastructure))
        // Session key publication
        .route("/v1/keys", get(handlers::list_keys))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
