//! Per-call access enforcement
//!
//! Every storage call presents the full credential triple. The session token
//! is verified, re-checked for expiry, matched against the presented access
//! key and secret, and only then is the shared resource policy evaluated
//! against the token's own tags. Nothing here is cached between calls.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use tenant_abac_bridge::secret_digest;
use tenant_abac_core::{AccessRequest, IsolationError, PolicyDocument, SessionClaims};

use crate::keys::KeyRegistry;

/// Error returned when a storage call is refused
///
/// None of these are retryable with the same credential.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("Missing credential component: {0}")]
    MissingCredential(&'static str),

    #[error("Invalid session token: {0}")]
    InvalidSessionToken(String),

    #[error("Access key does not match session token")]
    KeyMismatch,

    #[error("Secret key does not match session token")]
    SecretMismatch,

    #[error("Credential expired at {0}")]
    Expired(String),

    /// Policy evaluation denied the call
    #[error("Access denied for {action} on {resource}: {reason}")]
    Denied {
        action: String,
        resource: String,
        reason: String,
    },
}

impl AccessError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AccessError::MissingCredential(_) => "missing_credential",
            AccessError::InvalidSessionToken(_) => "invalid_session_token",
            AccessError::KeyMismatch => "access_key_mismatch",
            AccessError::SecretMismatch => "secret_key_mismatch",
            AccessError::Expired(_) => "credential_expired",
            AccessError::Denied { .. } => "access_denied",
        }
    }

    /// Whether the caller failed to authenticate, as opposed to being denied
    pub fn is_authentication_failure(&self) -> bool {
        !matches!(self, AccessError::Denied { .. })
    }
}

/// Credential components presented with a storage call
#[derive(Clone, Default)]
pub struct PresentedCredential {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for PresentedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresentedCredential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "[redacted]"))
            .field("session_token", &self.session_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Authenticates credentials and evaluates the resource policy
pub struct AccessEnforcer {
    policy: Arc<PolicyDocument>,
    registry: Arc<KeyRegistry>,
}

impl AccessEnforcer {
    pub fn new(policy: Arc<PolicyDocument>, registry: Arc<KeyRegistry>) -> Self {
        Self { policy, registry }
    }

    /// The policy every call is evaluated against
    pub fn policy(&self) -> &PolicyDocument {
        &self.policy
    }

    /// Authenticate a credential at `now`
    pub fn authenticate_at(
        &self,
        credential: &PresentedCredential,
        now: DateTime<Utc>,
    ) -> Result<SessionClaims, AccessError> {
        let access_key_id = non_empty(&credential.access_key_id)
            .ok_or(AccessError::MissingCredential("access key id"))?;
        let secret = non_empty(&credential.secret_access_key)
            .ok_or(AccessError::MissingCredential("secret access key"))?;
        let token = non_empty(&credential.session_token)
            .ok_or(AccessError::MissingCredential("session token"))?;

        let claims = self
            .registry
            .verify(token)
            .map_err(|e| AccessError::InvalidSessionToken(e.to_string()))?;

        if claims.is_expired_at(now) {
            return Err(AccessError::Expired(claims.expires_at().to_rfc3339()));
        }
        if claims.access_key_id != access_key_id {
            return Err(AccessError::KeyMismatch);
        }
        if claims.secret_digest != secret_digest(secret) {
            return Err(AccessError::SecretMismatch);
        }

        Ok(claims)
    }

    /// Authenticate a credential and authorize one request at `now`
    ///
    /// The tenant the policy resolves against comes from the verified session
    /// token, never from the request.
    pub fn authorize_at(
        &self,
        credential: &PresentedCredential,
        request: &AccessRequest,
        now: DateTime<Utc>,
    ) -> Result<SessionClaims, AccessError> {
        let claims = match self.authenticate_at(credential, now) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(
                    code = e.code(),
                    access_key_id = ?credential.access_key_id,
                    resource = %request.resource,
                    error = %e,
                    "Storage call rejected"
                );
                return Err(e);
            }
        };

        match self.policy.authorize(request, &claims.tags) {
            Ok(()) => Ok(claims),
            Err(IsolationError::PolicyEvaluationDenied {
                action,
                resource,
                reason,
            }) => Err(AccessError::Denied {
                action,
                resource,
                reason,
            }),
            Err(other) => Err(AccessError::Denied {
                action: request.action.clone(),
                resource: request.resource.clone(),
                reason: other.to_string(),
            }),
        }
    }

    /// Authorize at the current time
    pub fn authorize(
        &self,
        credential: &PresentedCredential,
        request: &AccessRequest,
    ) -> Result<SessionClaims, AccessError> {
        self.authorize_at(credential, request, Utc::now())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tenant_abac_core::{SessionTags, TenantId};

    const SECRET: &str = "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY";

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000, 0).unwrap()
    }

    fn enforcer() -> (AccessEnforcer, Arc<KeyRegistry>) {
        let registry = Arc::new(KeyRegistry::generate("plane-test"));
        let policy = PolicyDocument::tenant_scoped(
            "tenant-data",
            &["s3:GetObject".to_string(), "s3:PutObject".to_string()],
        )
        .unwrap();
        (AccessEnforcer::new(Arc::new(policy), registry.clone()), registry)
    }

    fn credential(registry: &KeyRegistry, tenant: &str) -> PresentedCredential {
        let claims = SessionClaims {
            session_id: "s-1".into(),
            access_key_id: "ASIAEXAMPLE0000000000".into(),
            secret_digest: secret_digest(SECRET),
            assumed_principal: "arn:aws:sts::000000000000:assumed-role/r/s-1".into(),
            subject: "auth0|alice".into(),
            issuer: "https://tenant.auth0.com/".into(),
            tags: SessionTags::for_tenant(&TenantId::parse(tenant).unwrap()),
            iat: now().timestamp(),
            exp: now().timestamp() + 3600,
        };
        PresentedCredential {
            access_key_id: Some(claims.access_key_id.clone()),
            secret_access_key: Some(SECRET.into()),
            session_token: Some(registry.signer().sign_session(&claims).unwrap().to_token().unwrap()),
        }
    }

    fn get(key: &str) -> AccessRequest {
        AccessRequest::object("s3:GetObject", "tenant-data", key).unwrap()
    }

    #[test]
    fn test_own_prefix_allowed() {
        let (enforcer, registry) = enforcer();
        let cred = credential(&registry, "acme-42");

        let claims = enforcer.authorize_at(&cred, &get("acme-42/report.csv"), now()).unwrap();
        assert_eq!(claims.tags.get("TenantID"), Some("acme-42"));
    }

    #[test]
    fn test_other_prefix_denied() {
        let (enforcer, registry) = enforcer();
        let cred = credential(&registry, "acme-42");

        let err = enforcer.authorize_at(&cred, &get("globex-7/report.csv"), now()).unwrap_err();
        assert!(matches!(err, AccessError::Denied { .. }));
        assert!(!err.is_authentication_failure());
    }

    #[test]
    fn test_missing_components() {
        let (enforcer, registry) = enforcer();
        let full = credential(&registry, "acme-42");

        let mut cred = full.clone();
        cred.session_token = None;
        assert_eq!(
            enforcer.authorize_at(&cred, &get("acme-42/a"), now()).unwrap_err(),
            AccessError::MissingCredential("session token")
        );

        let mut cred = full;
        cred.secret_access_key = Some("   ".into());
        assert_eq!(
            enforcer.authorize_at(&cred, &get("acme-42/a"), now()).unwrap_err(),
            AccessError::MissingCredential("secret access key")
        );
    }

    #[test]
    fn test_expiry_checked_every_call() {
        let (enforcer, registry) = enforcer();
        let cred = credential(&registry, "acme-42");

        assert!(enforcer.authorize_at(&cred, &get("acme-42/a"), now()).is_ok());
        let later = now() + chrono::Duration::seconds(3600);
        assert!(matches!(
            enforcer.authorize_at(&cred, &get("acme-42/a"), later),
            Err(AccessError::Expired(_))
        ));
    }

    #[test]
    fn test_credential_binding() {
        let (enforcer, registry) = enforcer();

        let mut cred = credential(&registry, "acme-42");
        cred.access_key_id = Some("ASIAOTHER".into());
        assert_eq!(
            enforcer.authenticate_at(&cred, now()).unwrap_err(),
            AccessError::KeyMismatch
        );

        let mut cred = credential(&registry, "acme-42");
        cred.secret_access_key = Some("guessed".into());
        assert_eq!(
            enforcer.authenticate_at(&cred, now()).unwrap_err(),
            AccessError::SecretMismatch
        );
    }

    #[test]
    fn test_token_from_untrusted_key() {
        let (enforcer, _) = enforcer();
        let rogue = KeyRegistry::generate("plane-test");
        let cred = credential(&rogue, "acme-42");

        assert!(matches!(
            enforcer.authenticate_at(&cred, now()),
            Err(AccessError::InvalidSessionToken(_))
        ));
    }

    #[test]
    fn test_swapped_session_token_keeps_its_own_tenant() {
        let (enforcer, registry) = enforcer();
        let acme = credential(&registry, "acme-42");
        let globex = credential(&registry, "globex-7");

        // Pair acme's keys with globex's token: the secret still matches since
        // both fixtures share it, but the tags come from the token
        let mixed = PresentedCredential {
            session_token: globex.session_token.clone(),
            ..acme
        };
        assert!(enforcer.authorize_at(&mixed, &get("acme-42/a"), now()).is_err());
        assert!(enforcer.authorize_at(&mixed, &get("globex-7/a"), now()).is_ok());
    }
}
