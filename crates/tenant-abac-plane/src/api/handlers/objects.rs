//! Policy-enforced object access
//!
//! Each call presents the full credential in headers. Authorization runs
//! before the store is touched, so a denied caller learns nothing about
//! whether the object exists.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::info;

use tenant_abac_core::{AccessRequest, TENANT_TAG_KEY};

use super::AppState;
use crate::api::error::ApiError;
use crate::core::PresentedCredential;
use crate::storage::ObjectSummary;

pub const ACCESS_KEY_HEADER: &str = "x-abac-access-key-id";
pub const SECRET_KEY_HEADER: &str = "x-abac-secret-access-key";
pub const SESSION_TOKEN_HEADER: &str = "x-abac-session-token";

const GET_OBJECT: &str = "s3:GetObject";
const PUT_OBJECT: &str = "s3:PutObject";

fn presented_credential(headers: &HeaderMap) -> PresentedCredential {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    PresentedCredential {
        access_key_id: get(ACCESS_KEY_HEADER),
        secret_access_key: get(SECRET_KEY_HEADER),
        session_token: get(SESSION_TOKEN_HEADER),
    }
}

/// Read an object
///
/// GET /v1/buckets/{bucket}/objects/{*key}
pub async fn get_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let credential = presented_credential(&headers);
    let request = AccessRequest::object(GET_OBJECT, &bucket, &key)?;
    state.enforcer.authorize(&credential, &request)?;

    let object = state.store.get_object(&bucket, &key).await?;
    let content_type = object
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));

    Ok(([(header::CONTENT_TYPE, content_type)], object.body).into_response())
}

/// Create or replace an object
///
/// PUT /v1/buckets/{bucket}/objects/{*key}
pub async fn put_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ObjectSummary>, ApiError> {
    let credential = presented_credential(&headers);
    let request = AccessRequest::object(PUT_OBJECT, &bucket, &key)?;
    let session = state.enforcer.authorize(&credential, &request)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let summary = state
        .store
        .put_object(&bucket, &key, body.to_vec(), content_type)
        .await?;

    info!(
        tenant_id = session.tags.get(TENANT_TAG_KEY).unwrap_or_default(),
        bucket = %bucket,
        key = %key,
        size = summary.size,
        "Object written"
    );
    Ok(Json(summary))
}
