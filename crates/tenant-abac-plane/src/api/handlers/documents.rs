//! Read-only views of the deployment

use axum::{extract::State, Json};
use std::sync::Arc;

use tenant_abac_core::{PolicyDocument, ResourceGraph};

use super::AppState;

/// The resource policy every storage call is evaluated against
///
/// GET /v1/policy
pub async fn get_policy(State(state): State<Arc<AppState>>) -> Json<PolicyDocument> {
    Json(state.enforcer.policy().clone())
}

/// The resource graph of this deployment
///
/// GET /v1/infrastructure
pub async fn get_infrastructure(State(state): State<Arc<AppState>>) -> Json<ResourceGraph> {
    Json(state.graph.clone())
}
