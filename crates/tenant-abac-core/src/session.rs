//! Federated sessions and the credentials bound to them

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::claims::TENANT_TAG_KEY;
use crate::error::{IsolationError, Result};
use crate::tenant::TenantId;

/// Session attributes bound to a credential at issuance
///
/// Keys are stored as issued. There is no mutation API once a credential has
/// been signed; policy evaluation reads them as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTags {
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    transitive: BTreeSet<String>,
}

impl SessionTags {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag set carrying only the tenant
    pub fn for_tenant(tenant_id: &TenantId) -> Self {
        let mut tags = Self::new();
        tags.insert(TENANT_TAG_KEY, tenant_id.as_str());
        tags
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub(crate) fn mark_transitive(&mut self, key: &str) {
        self.transitive.insert(key.to_string());
    }

    /// Look up a tag value by exact key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// The bound tenant, if the tag is present and well-formed
    pub fn tenant_id(&self) -> Option<TenantId> {
        self.get(TENANT_TAG_KEY)
            .and_then(|v| TenantId::parse(v).ok())
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether no tags are bound
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterate tags in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keys that propagate to chained sessions
    pub fn transitive_keys(&self) -> Vec<String> {
        self.transitive.iter().cloned().collect()
    }

    /// Tags as a plain map, for wire responses
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.tags.clone()
    }
}

/// The federated principal a credential is issued for
///
/// Carries the trust condition that admitted the token and the instruction
/// to propagate namespace claims as session tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPrincipal {
    /// Federation principal (role) identifier
    pub role_arn: String,

    /// OIDC provider the token came from, e.g. `tenant.auth0.com/`
    pub provider: String,

    /// Condition key checked at assume time, e.g. `tenant.auth0.com/:aud`
    pub audience_condition_key: String,

    /// Required value of the audience condition
    pub audience: String,

    /// Whether namespace claims become session tags
    pub propagate_session_tags: bool,
}

impl SessionPrincipal {
    /// Whether a token audience satisfies the trust condition
    pub fn admits_audience(&self, audience: &str) -> bool {
        self.audience == audience
    }
}

/// Signed body of a session token
///
/// This is everything the storage layer needs to authorize a call, so it
/// never has to consult issuance state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Unique id of this session
    pub session_id: String,

    /// Access key id the session is bound to
    pub access_key_id: String,

    /// Base64 SHA-256 of the secret access key
    pub secret_digest: String,

    /// Assumed-role identifier of the session
    pub assumed_principal: String,

    /// Subject of the identity token that was exchanged
    pub subject: String,

    /// Issuer of the identity token that was exchanged
    pub issuer: String,

    /// Bound session tags
    pub tags: SessionTags,

    /// Issued at (unix seconds)
    pub iat: i64,

    /// Expiration (unix seconds)
    pub exp: i64,
}

impl SessionClaims {
    /// Serialize the claims for signing
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(IsolationError::from)
    }

    /// Deserialize claims from a verified payload
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(IsolationError::from)
    }

    /// Expiration as a timestamp
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether the session has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// A temporary, tenant-scoped credential
#[derive(Clone, Serialize, Deserialize)]
pub struct ScopedCredential {
    /// Access key id
    pub access_key_id: String,

    /// Secret access key
    pub secret_access_key: String,

    /// Signed session token (base64url COSE_Sign1)
    pub session_token: String,

    /// Expiration
    pub expiration: DateTime<Utc>,

    /// Assumed-role identifier of the session
    pub assumed_principal: String,

    /// Bound session tags
    pub tags: SessionTags,
}

impl std::fmt::Debug for ScopedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCredential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[redacted]")
            .field("session_token", &"[redacted]")
            .field("expiration", &self.expiration)
            .field("assumed_principal", &self.assumed_principal)
            .field("tags", &self.tags)
            .finish()
    }
}

impl ScopedCredential {
    /// Check if the credential has expired
    pub fn is_expired(&self) -> bool {
        self.expiration <= Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_for_tenant() {
        let tenant = TenantId::parse("acme-42").unwrap();
        let tags = SessionTags::for_tenant(&tenant);
        assert_eq!(tags.tenant_id(), Some(tenant));
        assert_eq!(tags.get("TenantID"), Some("acme-42"));
        assert_eq!(tags.get("tenantid"), None);
    }

    #[test]
    fn test_malformed_tenant_tag_is_absent() {
        let mut tags = SessionTags::new();
        tags.insert(TENANT_TAG_KEY, "*");
        assert!(tags.tenant_id().is_none());
    }

    #[test]
    fn test_session_claims_expiry() {
        let claims = SessionClaims {
            session_id: "s-1".into(),
            access_key_id: "ASIAEXAMPLE".into(),
            secret_digest: "digest".into(),
            assumed_principal: "arn:aws:sts::000000000000:assumed-role/r/s-1".into(),
            subject: "auth0|alice".into(),
            issuer: "https://tenant.auth0.com/".into(),
            tags: SessionTags::new(),
            iat: 1_000,
            exp: 2_000,
        };

        let before = Utc.timestamp_opt(1_999, 0).unwrap();
        let at = Utc.timestamp_opt(2_000, 0).unwrap();
        assert!(!claims.is_expired_at(before));
        assert!(claims.is_expired_at(at));
    }

    #[test]
    fn test_credential_debug_redacts_secrets() {
        let credential = ScopedCredential {
            access_key_id: "ASIAEXAMPLE".into(),
            secret_access_key: "super-secret".into(),
            session_token: "token-bytes".into(),
            expiration: Utc::now(),
            assumed_principal: "p".into(),
            tags: SessionTags::new(),
        };
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("token-bytes"));
    }

    #[test]
    fn test_principal_audience_is_exact() {
        let principal = SessionPrincipal {
            role_arn: "arn:aws:iam::000000000000:role/tenant-data".into(),
            provider: "tenant.auth0.com/".into(),
            audience_condition_key: "tenant.auth0.com/:aud".into(),
            audience: "client-123".into(),
            propagate_session_tags: true,
        };
        assert!(principal.admits_audience("client-123"));
        assert!(!principal.admits_audience("client-1234"));
        assert!(!principal.admits_audience("client-12"));
        assert!(!principal.admits_audience("CLIENT-123"));
    }
}
