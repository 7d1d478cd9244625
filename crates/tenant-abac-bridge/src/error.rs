//! Error types for the Federation Trust Anchor

use thiserror::Error;

use tenant_abac_core::claims::TagClaimError;
use tenant_abac_core::IsolationError;

/// Result type for trust anchor operations
pub type Result<T> = std::result::Result<T, FederationError>;

/// Errors that can occur while validating or exchanging an identity token
#[derive(Error, Debug)]
pub enum FederationError {
    /// Signature does not verify against the provider's published keys
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Token issuer is not the configured provider
    #[error("Unknown issuer: {0}")]
    UnknownIssuer(String),

    /// Token audience is not exactly the configured client
    #[error("Audience mismatch: expected {expected}, got {actual}")]
    AudienceMismatch { expected: String, actual: String },

    /// Token expired
    #[error("Token expired at {0}")]
    Expired(String),

    /// Token used before its not-before time
    #[error("Token not valid until {0}")]
    NotYetValid(String),

    /// No tenant tag under the trusted namespace
    #[error("Missing tenant claim: {0}")]
    MissingTenantClaim(String),

    /// Tenant tag present but unusable
    #[error("Invalid tenant claim: {0}")]
    InvalidTenantClaim(String),

    /// Some other tag under the trusted namespace is malformed
    #[error("Invalid session tag: {0}")]
    InvalidSessionTag(String),

    /// Missing required claim
    #[error("Missing required claim: {0}")]
    MissingClaim(String),

    /// Token or request is structurally invalid
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Exchange request parameters are unacceptable
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No published key matches the token
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Token algorithm is not allowed
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Discovery document or key set could not be fetched
    #[error("Failed to fetch signing keys: {0}")]
    JwksFetch(String),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Credential minting failed
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FederationError {
    /// Whether the caller may retry with the same token
    ///
    /// Only transport failures qualify; every validation failure is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FederationError::JwksFetch(_) | FederationError::Http(_))
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            FederationError::InvalidSignature(_) => "invalid_signature",
            FederationError::UnknownIssuer(_) => "unknown_issuer",
            FederationError::AudienceMismatch { .. } => "audience_mismatch",
            FederationError::Expired(_) => "expired",
            FederationError::NotYetValid(_) => "not_yet_valid",
            FederationError::MissingTenantClaim(_) => "missing_tenant_claim",
            FederationError::InvalidTenantClaim(_) => "invalid_tenant_claim",
            FederationError::InvalidSessionTag(_) => "invalid_session_tag",
            FederationError::MissingClaim(_) => "missing_claim",
            FederationError::InvalidFormat(_) => "invalid_format",
            FederationError::InvalidRequest(_) => "invalid_request",
            FederationError::KeyNotFound(_) => "key_not_found",
            FederationError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            FederationError::JwksFetch(_) => "jwks_unavailable",
            FederationError::Http(_) => "provider_unavailable",
            FederationError::Internal(_) => "internal_error",
        }
    }

    /// Whether this is a transport/internal failure rather than a rejection
    pub fn is_server_side(&self) -> bool {
        self.is_retryable() || matches!(self, FederationError::Internal(_))
    }
}

impl From<jsonwebtoken::errors::Error> for FederationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => FederationError::InvalidSignature(err.to_string()),
            ErrorKind::InvalidAlgorithmName => {
                FederationError::UnsupportedAlgorithm(err.to_string())
            }
            _ => FederationError::InvalidFormat(err.to_string()),
        }
    }
}

impl From<TagClaimError> for FederationError {
    fn from(err: TagClaimError) -> Self {
        match err {
            TagClaimError::MissingTenantTag(reason) => FederationError::MissingTenantClaim(reason),
            TagClaimError::InvalidTenantTag(reason) => FederationError::InvalidTenantClaim(reason),
            other @ (TagClaimError::InvalidTag { .. } | TagClaimError::Malformed(_)) => {
                FederationError::InvalidSessionTag(other.to_string())
            }
        }
    }
}

impl From<IsolationError> for FederationError {
    fn from(err: IsolationError) -> Self {
        FederationError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for FederationError {
    fn from(err: reqwest::Error) -> Self {
        FederationError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for FederationError {
    fn from(err: serde_json::Error) -> Self {
        FederationError::InvalidFormat(err.to_string())
    }
}

impl From<FederationError> for IsolationError {
    fn from(err: FederationError) -> Self {
        IsolationError::FederationValidation(err.to_string())
    }
}
