//! Credential exchange
//!
//! Trades a validated identity token for a temporary credential carrying the
//! token's session tags. The session token is signed, so the storage layer can
//! authorize calls from the credential alone.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use tenant_abac_core::config::{MAX_SESSION_SECONDS, MIN_SESSION_SECONDS};
use tenant_abac_core::{KeyPair, ScopedCredential, SessionClaims, TENANT_TAG_KEY};

use crate::anchor::FederationTrustAnchor;
use crate::error::{FederationError, Result};
use crate::types::ValidatedIdentity;

/// Prefix of temporary access key ids
pub const ACCESS_KEY_PREFIX: &str = "ASIA";

const ACCESS_KEY_SUFFIX_LEN: usize = 16;
const SECRET_KEY_BYTES: usize = 30;

/// Credential exchange request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRequest {
    /// Client id the token was issued to
    pub audience: String,

    /// The identity token
    pub subject_token: String,

    /// Requested credential lifetime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,

    /// Caller-chosen session name, recorded in the assumed principal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
}

/// Credential exchange response
#[derive(Clone, Serialize, Deserialize)]
pub struct ExchangeResponse {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
    pub assumed_principal: String,
    pub subject: String,
    pub audience: String,
    pub provider: String,
    pub session_tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitive_tag_keys: Vec<String>,
}

impl std::fmt::Debug for ExchangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeResponse")
            .field("access_key", &self.access_key)
            .field("secret_key", &"[redacted]")
            .field("session_token", &"[redacted]")
            .field("expiration", &self.expiration)
            .field("assumed_principal", &self.assumed_principal)
            .field("session_tags", &self.session_tags)
            .finish()
    }
}

impl ExchangeResponse {
    fn new(credential: &ScopedCredential, identity: &ValidatedIdentity) -> Self {
        Self {
            access_key: credential.access_key_id.clone(),
            secret_key: credential.secret_access_key.clone(),
            session_token: credential.session_token.clone(),
            expiration: credential.expiration,
            assumed_principal: credential.assumed_principal.clone(),
            subject: identity.subject.clone(),
            audience: identity.audience.clone(),
            provider: identity.principal.provider.clone(),
            session_tags: credential.tags.to_map(),
            transitive_tag_keys: credential.tags.transitive_keys(),
        }
    }
}

/// Validates identity tokens and mints tenant-scoped credentials
pub struct CredentialExchange {
    anchor: Arc<FederationTrustAnchor>,
    signer: KeyPair,
    max_session_seconds: u64,
}

impl CredentialExchange {
    /// Create an exchange with a session-token signing key
    pub fn new(anchor: Arc<FederationTrustAnchor>, signer: KeyPair, max_session_seconds: u64) -> Self {
        Self {
            anchor,
            signer,
            max_session_seconds: max_session_seconds.clamp(MIN_SESSION_SECONDS, MAX_SESSION_SECONDS),
        }
    }

    /// The trust anchor tokens are validated against
    pub fn anchor(&self) -> &FederationTrustAnchor {
        &self.anchor
    }

    /// Exchange a token now
    pub async fn exchange(&self, request: &ExchangeRequest) -> Result<ExchangeResponse> {
        self.exchange_at(request, Utc::now()).await
    }

    /// Exchange a token at an explicit time
    pub async fn exchange_at(
        &self,
        request: &ExchangeRequest,
        now: DateTime<Utc>,
    ) -> Result<ExchangeResponse> {
        if !self.anchor.principal().admits_audience(&request.audience) {
            warn!(audience = %request.audience, "Exchange requested for foreign audience");
            return Err(FederationError::AudienceMismatch {
                expected: self.anchor.audience().to_string(),
                actual: request.audience.clone(),
            });
        }
        let ttl = self.requested_ttl(request.duration_seconds)?;
        let session_name = validate_session_name(request.session_name.as_deref())?;

        let identity = self.anchor.validate_at(&request.subject_token, now).await?;
        let credential = self.issue(&identity, ttl, session_name, now)?;
        Ok(ExchangeResponse::new(&credential, &identity))
    }

    fn requested_ttl(&self, requested: Option<u64>) -> Result<u64> {
        match requested {
            None => Ok(self.max_session_seconds),
            Some(secs) if (MIN_SESSION_SECONDS..=self.max_session_seconds).contains(&secs) => Ok(secs),
            Some(secs) => Err(FederationError::InvalidRequest(format!(
                "duration_seconds {} outside {}..={}",
                secs, MIN_SESSION_SECONDS, self.max_session_seconds
            ))),
        }
    }

    /// Mint a credential for a validated identity
    ///
    /// Lifetime is the smallest of the requested duration, the configured
    /// maximum and the token's remaining validity.
    pub fn issue(
        &self,
        identity: &ValidatedIdentity,
        ttl_seconds: u64,
        session_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ScopedCredential> {
        if identity.tenant_id().is_none() {
            return Err(FederationError::MissingTenantClaim(format!(
                "no usable '{}' tag",
                TENANT_TAG_KEY
            )));
        }

        let remaining = identity.remaining_seconds(now);
        let ttl = i64::try_from(ttl_seconds.min(self.max_session_seconds))
            .unwrap_or(i64::MAX)
            .min(remaining);
        if ttl <= 0 {
            return Err(FederationError::Expired(identity.expires_at.to_rfc3339()));
        }
        let expiration = now + Duration::seconds(ttl);

        let session_id = Uuid::new_v4().to_string();
        let session_name = session_name.unwrap_or_else(|| session_id.clone());
        let access_key_id = generate_access_key_id();
        let secret_access_key = generate_secret();
        let assumed_principal = assumed_principal(&identity.principal.role_arn, &session_name);

        let claims = SessionClaims {
            session_id,
            access_key_id: access_key_id.clone(),
            secret_digest: secret_digest(&secret_access_key),
            assumed_principal: assumed_principal.clone(),
            subject: identity.subject.clone(),
            issuer: identity.issuer.clone(),
            tags: identity.tags.clone(),
            iat: now.timestamp(),
            exp: expiration.timestamp(),
        };
        let session_token = self.signer.sign_session(&claims)?.to_token()?;

        info!(
            tenant_id = %identity.tags.get(TENANT_TAG_KEY).unwrap_or_default(),
            subject = %identity.subject,
            access_key_id = %access_key_id,
            ttl_seconds = ttl,
            "Issued scoped credential"
        );

        Ok(ScopedCredential {
            access_key_id,
            secret_access_key,
            session_token,
            expiration,
            assumed_principal,
            tags: identity.tags.clone(),
        })
    }
}

/// Base64 SHA-256 of a secret access key, as bound into the session token
pub fn secret_digest(secret: &str) -> String {
    STANDARD.encode(Sha256::digest(secret.as_bytes()))
}

fn generate_access_key_id() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut rng = OsRng;
    let suffix: String = (0..ACCESS_KEY_SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}{}", ACCESS_KEY_PREFIX, suffix)
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

fn assumed_principal(role_arn: &str, session_name: &str) -> String {
    let sts = role_arn
        .replacen(":iam::", ":sts::", 1)
        .replacen(":role/", ":assumed-role/", 1);
    format!("{}/{}", sts, session_name)
}

fn validate_session_name(name: Option<&str>) -> Result<Option<String>> {
    let Some(name) = name else {
        return Ok(None);
    };
    let valid = (2..=64).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_+=,.@-".contains(c));
    if valid {
        Ok(Some(name.to_string()))
    } else {
        Err(FederationError::InvalidRequest(format!(
            "session_name '{}' must be 2-64 characters of [A-Za-z0-9_+=,.@-]",
            name.escape_debug()
        )))
    }
}
