//! Session key publication

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use tenant_abac_core::SerializablePublicKey;

use super::AppState;

/// Published session-token verification keys
#[derive(Debug, Serialize)]
pub struct KeysResponse {
    /// Key that signs newly issued session tokens
    pub signing_kid: String,

    /// Every key session tokens are verified against
    pub keys: Vec<SerializablePublicKey>,
}

/// List the keys this plane verifies session tokens with
///
/// GET /v1/keys
///
/// The output is the value `TENANT_ABAC_TRUSTED_KEYS` takes on a successor.
pub async fn list_keys(State(state): State<Arc<AppState>>) -> Json<KeysResponse> {
    Json(KeysResponse {
        signing_kid: state.registry.kid().to_string(),
        keys: state.registry.published(),
    })
}
