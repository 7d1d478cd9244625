//! Federation Trust Anchor - validates identity tokens before exchange
//!
//! Gates run in a fixed order and each one is final:
//!
//! 1. signature against the provider's published keys
//! 2. issuer equals the configured provider
//! 3. audience equals the configured client id exactly
//! 4. not expired, not before its not-before time
//!
//! Only then are the namespace claims turned into session tags, and a token
//! without a usable tenant tag is rejected.
//!
//! An unknown `kid` forces at most one key refresh per cooldown window.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use tenant_abac_core::{session_tags_from_claims, ConfigError, IsolationConfig, SessionPrincipal};

use crate::error::{FederationError, Result};
use crate::keys::{Jwk, KeySource};
use crate::types::{IdTokenClaims, ValidatedIdentity};

/// Validates identity tokens issued by one provider for one client
pub struct FederationTrustAnchor {
    issuer: String,
    principal: SessionPrincipal,
    namespace: String,
    leeway_seconds: i64,
    refresh_cooldown_seconds: i64,
    last_refresh: Mutex<Option<DateTime<Utc>>>,
    algorithms: Vec<Algorithm>,
    keys: Arc<dyn KeySource>,
}

impl FederationTrustAnchor {
    /// Create a trust anchor for a deployment
    pub fn new(
        config: &IsolationConfig,
        keys: Arc<dyn KeySource>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let algorithms = config
            .allowed_algorithms
            .iter()
            .map(|name| {
                name.parse::<Algorithm>().map_err(|_| ConfigError::Invalid {
                    key: "allowed_algorithms".into(),
                    reason: format!("unknown algorithm '{}'", name),
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let leeway_seconds = i64::try_from(config.clock_leeway_seconds).map_err(|_| {
            ConfigError::Invalid {
                key: "clock_leeway_seconds".into(),
                reason: "out of range".into(),
            }
        })?;

        let refresh_cooldown_seconds = i64::try_from(config.jwks_refresh_cooldown_seconds)
            .map_err(|_| ConfigError::Invalid {
                key: "jwks_refresh_cooldown_seconds".into(),
                reason: "out of range".into(),
            })?;

        info!(
            issuer = %config.issuer(),
            audience = %config.client_id,
            keys = keys.description(),
            "Federation trust anchor ready"
        );

        Ok(Self {
            issuer: config.issuer(),
            principal: config.session_principal(),
            namespace: config.claims_namespace.clone(),
            leeway_seconds,
            refresh_cooldown_seconds,
            last_refresh: Mutex::new(None),
            algorithms,
            keys,
        })
    }

    /// Expected issuer
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The client id tokens must be issued to
    pub fn audience(&self) -> &str {
        &self.principal.audience
    }

    /// Principal exchanged tokens are bound to
    pub fn principal(&self) -> &SessionPrincipal {
        &self.principal
    }

    /// Validate a token against the current time
    pub async fn validate(&self, token: &str) -> Result<ValidatedIdentity> {
        self.validate_at(token, Utc::now()).await
    }

    /// Validate a token against an explicit time
    pub async fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<ValidatedIdentity> {
        let result = self.run_gates(token, now).await;

        match &result {
            Ok(identity) => {
                info!(
                    subject = %identity.subject,
                    tenant_id = identity.tags.get(tenant_abac_core::TENANT_TAG_KEY).unwrap_or_default(),
                    "Identity token accepted"
                );
            }
            Err(e) => {
                warn!(code = e.code(), error = %e, "Identity token rejected");
            }
        }

        result
    }

    async fn run_gates(&self, token: &str, now: DateTime<Utc>) -> Result<ValidatedIdentity> {
        // Gate 1: signature
        let claims = self.verify_signature(token, now).await?;

        // Gate 2: issuer
        let issuer = match claims.iss {
            Some(iss) if iss == self.issuer => iss,
            Some(other) => return Err(FederationError::UnknownIssuer(other)),
            None => return Err(FederationError::UnknownIssuer("no iss claim".into())),
        };

        // Gate 3: audience, exact
        let audience = single_audience(claims.aud.as_ref());
        let audience = match audience {
            Some(aud) if self.principal.admits_audience(&aud) => aud,
            other => {
                return Err(FederationError::AudienceMismatch {
                    expected: self.principal.audience.clone(),
                    actual: other.unwrap_or_else(|| render_audience(claims.aud.as_ref())),
                })
            }
        };

        // Gate 4: validity window
        let exp = claims
            .exp
            .ok_or_else(|| FederationError::MissingClaim("exp".into()))?;
        let now_ts = now.timestamp();
        if now_ts >= exp.saturating_add(self.leeway_seconds) {
            return Err(FederationError::Expired(timestamp(exp)));
        }
        if let Some(nbf) = claims.nbf {
            if now_ts.saturating_add(self.leeway_seconds) < nbf {
                return Err(FederationError::NotYetValid(timestamp(nbf)));
            }
        }

        let subject = claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FederationError::MissingClaim("sub".into()))?;

        // Tags from the trusted namespace only; no tenant tag, no credential
        let tags = session_tags_from_claims(&claims.extra, &self.namespace)?;

        debug!(subject = %subject, tags = tags.len(), "Propagating session tags");

        Ok(ValidatedIdentity {
            subject,
            issuer,
            audience,
            principal: self.principal.clone(),
            tags,
            issued_at: claims.iat.and_then(|iat| Utc.timestamp_opt(iat, 0).single()),
            expires_at: Utc
                .timestamp_opt(exp, 0)
                .single()
                .ok_or_else(|| FederationError::InvalidFormat("exp out of range".into()))?,
        })
    }

    async fn verify_signature(&self, token: &str, now: DateTime<Utc>) -> Result<IdTokenClaims> {
        let header =
            decode_header(token).map_err(|e| FederationError::InvalidFormat(e.to_string()))?;

        // Allowlist before any key lookup, so HMAC tokens never meet a public key
        if !self.algorithms.contains(&header.alg) {
            return Err(FederationError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let jwk = self.find_key(header.kid.as_deref(), now).await?;
        let decoding_key = jwk.decoding_key(header.alg)?;

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let data = decode::<IdTokenClaims>(token, &decoding_key, &validation)?;
        Ok(data.claims)
    }

    async fn find_key(&self, kid: Option<&str>, now: DateTime<Utc>) -> Result<Jwk> {
        let not_found =
            || FederationError::KeyNotFound(kid.unwrap_or("no kid and no unique signing key").into());

        let keys = self.keys.key_set(false).await?;
        if let Some(jwk) = keys.find(kid).cloned() {
            return Ok(jwk);
        }

        // The header is unauthenticated, so unknown kids may only force one
        // refetch per cooldown window
        if !self.claim_refresh(now) {
            debug!(kid = ?kid, "Key not in cached set, refresh on cooldown");
            return Err(not_found());
        }

        debug!(kid = ?kid, "Key not in cached set, refreshing");
        let refreshed = self.keys.key_set(true).await?;
        refreshed.find(kid).cloned().ok_or_else(not_found)
    }

    /// Take the forced-refresh slot if the cooldown has passed
    fn claim_refresh(&self, now: DateTime<Utc>) -> bool {
        let mut last = self.last_refresh.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if now.timestamp() < at.timestamp().saturating_add(self.refresh_cooldown_seconds) => {
                false
            }
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// The one audience a token names, if it names exactly one
fn single_audience(aud: Option<&Value>) -> Option<String> {
    match aud? {
        Value::String(s) => Some(s.clone()),
        Value::Array(values) if values.len() == 1 => values[0].as_str().map(String::from),
        _ => None,
    }
}

fn render_audience(aud: Option<&Value>) -> String {
    aud.map(Value::to_string).unwrap_or_else(|| "<none>".into())
}

fn timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_audience() {
        assert_eq!(single_audience(Some(&json!("client-123"))), Some("client-123".into()));
        assert_eq!(single_audience(Some(&json!(["client-123"]))), Some("client-123".into()));
        assert_eq!(single_audience(Some(&json!(["client-123", "other"]))), None);
        assert_eq!(single_audience(Some(&json!([]))), None);
        assert_eq!(single_audience(Some(&json!(42))), None);
        assert_eq!(single_audience(None), None);
    }

    #[test]
    fn test_render_audience() {
        assert_eq!(render_audience(None), "<none>");
        assert_eq!(render_audience(Some(&json!(["a", "b"]))), r#"["a","b"]"#);
    }
}
