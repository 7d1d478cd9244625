//! Credential exchange handler
//!
//! The federation entry point: an identity token goes in, a tenant-scoped
//! temporary credential comes out, or the request fails closed.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::sync::Arc;

use tenant_abac_bridge::{ExchangeRequest, ExchangeResponse};

use super::AppState;
use crate::api::error::ApiError;

/// Exchange an identity token for a scoped credential
///
/// POST /v1/credentials/exchange
pub async fn exchange_credentials(
    State(state): State<Arc<AppState>>,
    request: Result<Json<ExchangeRequest>, JsonRejection>,
) -> Result<Json<ExchangeResponse>, ApiError> {
    let Json(request) = request?;
    let response = state.exchange.exchange(&request).await?;
    Ok(Json(response))
}
