//! Core types for the Federation Trust Anchor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tenant_abac_core::{SessionPrincipal, SessionTags, TenantId};

/// Registered claims of an identity token, plus everything else
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct IdTokenClaims {
    pub iss: Option<String>,
    pub sub: Option<String>,
    /// String or array
    pub aud: Option<Value>,
    pub exp: Option<i64>,
    pub nbf: Option<i64>,
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An identity token that passed every gate
///
/// This is the output of validation, containing:
/// - The principal the token may assume and the trust condition it met
/// - The session tags propagated from the trusted namespace
/// - The token's own validity window, which bounds any credential minted from it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedIdentity {
    /// Token subject
    pub subject: String,

    /// Token issuer
    pub issuer: String,

    /// The audience that satisfied the trust condition
    pub audience: String,

    /// Federated principal and its trust condition
    pub principal: SessionPrincipal,

    /// Tags propagated from the trusted namespace
    pub tags: SessionTags,

    /// When the token was issued, if stated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,

    /// When the token expires
    pub expires_at: DateTime<Utc>,
}

impl ValidatedIdentity {
    /// The tenant carried by the token
    ///
    /// Validation guarantees this is present.
    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tags.tenant_id()
    }

    /// Remaining validity at `now`, in whole seconds
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// Check if the token has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}
