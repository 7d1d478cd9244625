//! Error types for tenant isolation
//!
//! The taxonomy mirrors where in the trust pipeline a failure happens:
//! deploy-time configuration, login-time claim injection, token exchange,
//! and access-time policy evaluation. Every variant is fail-closed.

use thiserror::Error;

/// Result type alias using IsolationError
pub type Result<T> = std::result::Result<T, IsolationError>;

/// Errors that can occur anywhere in the isolation pipeline
#[derive(Error, Debug)]
pub enum IsolationError {
    /// Missing or malformed deploy-time configuration
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The claim injector refused to set the tenant claim
    #[error("Claim injection failed: {0}")]
    ClaimInjection(String),

    /// Identity token rejected by the federation trust anchor
    #[error("Federation validation failed: {0}")]
    FederationValidation(String),

    /// Storage call rejected by the resource policy
    #[error("Access denied: {action} on {resource} ({reason})")]
    PolicyEvaluationDenied {
        action: String,
        resource: String,
        reason: String,
    },

    /// A request names a resource that cannot be evaluated safely
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// The resource policy would not isolate tenants
    #[error("Policy lint failed: {0}")]
    PolicyLint(String),

    /// Session token signing or verification error
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// COSE encoding/decoding error
    #[error("COSE error: {0}")]
    Cose(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl IsolationError {
    /// Whether retrying the same call can ever produce a different outcome.
    ///
    /// Nothing in this taxonomy is a transport failure, so nothing is.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Deploy-time configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required value is absent
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// A value is present but unusable
    #[error("Invalid configuration for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl From<ed25519_dalek::SignatureError> for IsolationError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        IsolationError::Crypto(err.to_string())
    }
}

impl From<serde_json::Error> for IsolationError {
    fn from(err: serde_json::Error) -> Self {
        IsolationError::Serialization(err.to_string())
    }
}

impl From<coset::CoseError> for IsolationError {
    fn from(err: coset::CoseError) -> Self {
        IsolationError::Cose(format!("{:?}", err))
    }
}
