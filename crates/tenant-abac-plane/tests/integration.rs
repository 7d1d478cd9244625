//! Integration Tests for the Isolation Plane
//!
//! These tests drive the HTTP router in-process:
//! - Identity token exchange for a tenant-scoped credential
//! - Object access through the shared policy with that credential
//! - Health, readiness and the rendered deployment documents

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use tenant_abac_bridge::StaticKeySource;
use tenant_abac_core::{IsolationConfig, SerializablePublicKey};
use tenant_abac_plane::storage::ObjectStore;
use tenant_abac_plane::{create_router, AppState, KeyRegistry, MemoryObjectStore};

const IDP_KEY: &[u8] = include_bytes!("fixtures/idp_signing_key.pem");
const JWKS: &str = include_str!("fixtures/jwks.json");

const DOMAIN: &str = "tenant.auth0.com";
const CLIENT_ID: &str = "client-123";
const BUCKET: &str = "tenant-data";
const NAMESPACE: &str = "https://aws.amazon.com/tags";

// =============================================================================
// Test Helpers
// =============================================================================

fn config() -> IsolationConfig {
    let mut config = IsolationConfig::for_domain(DOMAIN, CLIENT_ID).with_bucket(BUCKET);
    config.allowed_actions = vec!["s3:GetObject".into(), "s3:PutObject".into()];
    config
}

fn plane(config: IsolationConfig, registry: Arc<KeyRegistry>, store: Arc<MemoryObjectStore>) -> Router {
    let keys = Arc::new(StaticKeySource::from_json(JWKS).unwrap());
    let state = AppState::new(config, keys, registry, store).unwrap();
    create_router(Arc::new(state))
}

fn app_with(config: IsolationConfig) -> (Router, Arc<MemoryObjectStore>) {
    let registry = Arc::new(KeyRegistry::generate("plane-test"));
    let store = Arc::new(MemoryObjectStore::with_bucket(BUCKET));
    (plane(config, registry, store.clone()), store)
}

fn app() -> (Router, Arc<MemoryObjectStore>) {
    app_with(config())
}

fn id_token(tenant: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "iss": format!("https://{}/", DOMAIN),
        "sub": "auth0|alice",
        "aud": CLIENT_ID,
        "iat": now - 30,
        "exp": now + 3600,
        NAMESPACE: {"principal_tags": {"TenantID": [tenant]}}
    });
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("idp-key-1".into());
    encode(&header, &claims, &EncodingKey::from_rsa_pem(IDP_KEY).unwrap()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn exchange_request(token: &str) -> Request<Body> {
    Request::post("/v1/credentials/exchange")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"audience": CLIENT_ID, "subject_token": token}).to_string(),
        ))
        .unwrap()
}

async fn exchange(app: &Router, tenant: &str) -> Value {
    let (status, body) = send_json(app, exchange_request(&id_token(tenant))).await;
    assert_eq!(status, StatusCode::OK, "exchange failed: {}", body);
    body
}

fn object_request(method: &str, key: &str, credential: &Value, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(format!("/v1/buckets/{}/objects/{}", BUCKET, key))
        .header("x-abac-access-key-id", credential["access_key"].as_str().unwrap())
        .header("x-abac-secret-access-key", credential["secret_key"].as_str().unwrap())
        .header("x-abac-session-token", credential["session_token"].as_str().unwrap())
        .header("content-type", "text/plain")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_and_ready() {
    let (app, _) = app();

    let (status, body) = send_json(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send_json(&app, Request::get("/ready").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    assert_eq!(body["issuer"], "https://tenant.auth0.com/");
    assert_eq!(body["audience"], CLIENT_ID);
    assert_eq!(body["signing_kid"], "plane-test");
}

// =============================================================================
// Credential Exchange
// =============================================================================

#[tokio::test]
async fn test_exchange_returns_tenant_scoped_credential() {
    let (app, _) = app();
    let credential = exchange(&app, "acme-42").await;

    assert!(credential["access_key"].as_str().unwrap().starts_with("ASIA"));
    assert!(!credential["secret_key"].as_str().unwrap().is_empty());
    assert_eq!(credential["session_tags"]["TenantID"], "acme-42");
    assert_eq!(credential["subject"], "auth0|alice");
    assert_eq!(credential["audience"], CLIENT_ID);
    assert!(credential["assumed_principal"]
        .as_str()
        .unwrap()
        .starts_with("arn:aws:sts::000000000000:assumed-role/tenant-scoped-access/"));
}

#[tokio::test]
async fn test_exchange_without_tenant_claim_fails_closed() {
    let (app, _) = app();
    let now = Utc::now().timestamp();
    let claims = json!({
        "iss": format!("https://{}/", DOMAIN),
        "sub": "auth0|mallory",
        "aud": CLIENT_ID,
        "exp": now + 3600,
    });
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("idp-key-1".into());
    let token = encode(&header, &claims, &EncodingKey::from_rsa_pem(IDP_KEY).unwrap()).unwrap();

    let (status, body) = send_json(&app, exchange_request(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "missing_tenant_claim");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_exchange_rejects_bad_duration() {
    let (app, _) = app();
    let request = Request::post("/v1/credentials/exchange")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "audience": CLIENT_ID,
                "subject_token": id_token("acme-42"),
                "duration_seconds": 60
            })
            .to_string(),
        ))
        .unwrap();

    let (status, body) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_exchange_rejects_malformed_body() {
    let (app, _) = app();

    for (content_type, body) in [
        ("application/json", "{not json"),
        ("application/json", r#"{"audience": "client-123"}"#),
        ("text/plain", r#"{"audience": "client-123", "subject_token": "x"}"#),
    ] {
        let request = Request::post("/v1/credentials/exchange")
            .header("content-type", content_type)
            .body(Body::from(body))
            .unwrap();

        let (status, body) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_request");
        assert_eq!(body["retryable"], false);
        assert!(body["error"].as_str().is_some());
    }
}

// =============================================================================
// Object Access
// =============================================================================

#[tokio::test]
async fn test_tenant_reads_and_writes_own_prefix() {
    let (app, store) = app();
    let credential = exchange(&app, "acme-42").await;

    let (status, body) =
        send_json(&app, object_request("PUT", "acme-42/report.csv", &credential, "a,b\n1,2\n")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "acme-42/report.csv");
    assert_eq!(body["size"], 8);
    assert_eq!(store.object_count(BUCKET), 1);

    let (status, body) = send(&app, object_request("GET", "acme-42/report.csv", &credential, "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"a,b\n1,2\n");
}

#[tokio::test]
async fn test_tenant_cannot_read_other_prefix() {
    let (app, store) = app();
    store
        .put_object(BUCKET, "globex-7/secret.txt", b"globex only".to_vec(), None)
        .await
        .unwrap();
    let credential = exchange(&app, "acme-42").await;

    let (status, body) =
        send_json(&app, object_request("GET", "globex-7/secret.txt", &credential, "")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "access_denied");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_two_tenants_share_one_policy() {
    let (app, _) = app();
    let acme = exchange(&app, "acme-42").await;
    let globex = exchange(&app, "globex-7").await;

    let (status, _) = send(&app, object_request("PUT", "acme-42/a.txt", &acme, "acme")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, object_request("PUT", "globex-7/a.txt", &globex, "globex")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, object_request("GET", "acme-42/a.txt", &globex, "")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, object_request("PUT", "globex-7/a.txt", &acme, "overwrite")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = send(&app, object_request("GET", "globex-7/a.txt", &globex, "")).await;
    assert_eq!(body, b"globex");
}

#[tokio::test]
async fn test_missing_object_is_not_found_after_authorization() {
    let (app, _) = app();
    let credential = exchange(&app, "acme-42").await;

    let (status, body) = send_json(&app, object_request("GET", "acme-42/none", &credential, "")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "no_such_key");
}

#[tokio::test]
async fn test_default_policy_is_read_only() {
    let (app, _) = app_with(IsolationConfig::for_domain(DOMAIN, CLIENT_ID).with_bucket(BUCKET));
    let credential = exchange(&app, "acme-42").await;

    let (status, _) = send(&app, object_request("PUT", "acme-42/a.txt", &credential, "x")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_missing_credential_headers() {
    let (app, _) = app();
    let request = Request::get(format!("/v1/buckets/{}/objects/acme-42/a.txt", BUCKET))
        .body(Body::empty())
        .unwrap();

    let (status, body) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "missing_credential");
}

// =============================================================================
// Deployment Documents
// =============================================================================

#[tokio::test]
async fn test_policy_document_is_tenant_scoped() {
    let (app, _) = app();
    let (status, body) = send_json(&app, Request::get("/v1/policy").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Version"], "2012-10-17");
    assert_eq!(
        body["Statement"][0]["Resource"][0],
        "arn:aws:s3:::tenant-data/${aws:PrincipalTag/TenantID}/*"
    );
}

#[tokio::test]
async fn test_infrastructure_graph_outputs() {
    let (app, _) = app();
    let (status, body) =
        send_json(&app, Request::get("/v1/infrastructure").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outputs"]["S3BucketName"], BUCKET);
    assert_eq!(
        body["outputs"]["IAMRoleARN"],
        "arn:aws:iam::000000000000:role/tenant-scoped-access"
    );
}

// =============================================================================
// Session Keys
// =============================================================================

#[tokio::test]
async fn test_keys_are_published() {
    let (app, _) = app();
    let (status, body) = send_json(&app, Request::get("/v1/keys").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["signing_kid"], "plane-test");
    assert_eq!(body["keys"].as_array().unwrap().len(), 1);
    assert_eq!(body["keys"][0]["kid"], "plane-test");
    assert!(body["keys"][0]["key"].as_str().is_some());
}

#[tokio::test]
async fn test_credentials_survive_key_rotation() {
    let store = Arc::new(MemoryObjectStore::with_bucket(BUCKET));
    let old = plane(config(), Arc::new(KeyRegistry::generate("plane-0")), store.clone());

    let credential = exchange(&old, "acme-42").await;
    let (status, _) = send(&old, object_request("PUT", "acme-42/a.txt", &credential, "kept")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, published) = send_json(&old, Request::get("/v1/keys").body(Body::empty()).unwrap()).await;

    // A successor that does not know the old key rejects the credential
    let stranger = plane(config(), Arc::new(KeyRegistry::generate("plane-1")), store.clone());
    let (status, body) = send_json(&stranger, object_request("GET", "acme-42/a.txt", &credential, "")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_session_token");

    // One configured with the published keys accepts it
    let registry = Arc::new(KeyRegistry::generate("plane-1"));
    let keys: Vec<SerializablePublicKey> = serde_json::from_value(published["keys"].clone()).unwrap();
    registry.trust_published(keys).unwrap();
    let successor = plane(config(), registry, store);

    let (status, body) = send(&successor, object_request("GET", "acme-42/a.txt", &credential, "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"kept");
}
