//! Tenant claim layout inside identity tokens
//!
//! The identity provider writes session tags under a namespaced custom claim:
//!
//! ```json
//! {
//!   "https://aws.amazon.com/tags": {
//!     "principal_tags": { "TenantID": ["acme-42"] },
//!     "transitive_tag_keys": ["TenantID"]
//!   }
//! }
//! ```
//!
//! Every principal tag value is a single-element list. Anything else under the
//! namespace is rejected rather than coerced.

use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::session::SessionTags;
use crate::tenant::TenantId;

/// Custom claim namespace the federation broker reads session tags from
pub const DEFAULT_CLAIMS_NAMESPACE: &str = "https://aws.amazon.com/tags";

/// Key of the tag map inside the namespace claim
pub const PRINCIPAL_TAGS_KEY: &str = "principal_tags";

/// Key of the transitive tag list inside the namespace claim
pub const TRANSITIVE_TAG_KEYS_KEY: &str = "transitive_tag_keys";

/// Session tag carrying the tenant
pub const TENANT_TAG_KEY: &str = "TenantID";

/// Upper bound on propagated tags per session
pub const MAX_SESSION_TAGS: usize = 50;

const MAX_TAG_KEY_LEN: usize = 128;
const MAX_TAG_VALUE_LEN: usize = 256;

/// Why a namespace claim could not be turned into session tags
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagClaimError {
    /// No tenant tag anywhere in the token
    #[error("tenant claim missing: {0}")]
    MissingTenantTag(String),

    /// Tenant tag present but not exactly one path-safe value
    #[error("tenant claim invalid: {0}")]
    InvalidTenantTag(String),

    /// Some other tag under the namespace is malformed
    #[error("session tag '{key}' invalid: {reason}")]
    InvalidTag { key: String, reason: String },

    /// The namespace claim itself has the wrong shape
    #[error("tag claim malformed: {0}")]
    Malformed(String),
}

/// The `principal_tags.TenantID = [tenant]` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantClaim {
    tenant_id: TenantId,
}

impl TenantClaim {
    /// Create a claim for a validated tenant
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    /// The tenant this claim asserts
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Render the namespace claim value
    pub fn to_value(&self) -> Value {
        json!({
            PRINCIPAL_TAGS_KEY: {
                TENANT_TAG_KEY: [self.tenant_id.as_str()]
            }
        })
    }
}

/// Extract session tags from a full claim set
pub fn session_tags_from_claims(
    claims: &Map<String, Value>,
    namespace: &str,
) -> Result<SessionTags, TagClaimError> {
    let namespaced = claims.get(namespace).ok_or_else(|| {
        TagClaimError::MissingTenantTag(format!("no '{}' claim", namespace))
    })?;
    session_tags_from_value(namespaced)
}

/// Extract session tags from the namespace claim value
pub fn session_tags_from_value(namespaced: &Value) -> Result<SessionTags, TagClaimError> {
    let namespaced = namespaced
        .as_object()
        .ok_or_else(|| TagClaimError::Malformed("namespace claim is not an object".into()))?;

    let principal_tags = match namespaced.get(PRINCIPAL_TAGS_KEY) {
        Some(Value::Object(tags)) => tags,
        Some(_) => {
            return Err(TagClaimError::Malformed(format!(
                "'{}' is not an object",
                PRINCIPAL_TAGS_KEY
            )))
        }
        None => {
            return Err(TagClaimError::MissingTenantTag(format!(
                "no '{}' in namespace claim",
                PRINCIPAL_TAGS_KEY
            )))
        }
    };

    if principal_tags.len() > MAX_SESSION_TAGS {
        return Err(TagClaimError::Malformed(format!(
            "{} tags exceeds limit of {}",
            principal_tags.len(),
            MAX_SESSION_TAGS
        )));
    }

    let mut seen = BTreeSet::new();
    let mut tags = SessionTags::new();

    for (key, value) in principal_tags {
        if !seen.insert(key.to_ascii_lowercase()) {
            return Err(TagClaimError::InvalidTag {
                key: key.clone(),
                reason: "duplicate key (keys are case-insensitive)".into(),
            });
        }
        let is_tenant = key.eq_ignore_ascii_case(TENANT_TAG_KEY);
        if is_tenant && key != TENANT_TAG_KEY {
            return Err(TagClaimError::InvalidTenantTag(format!(
                "tenant tag must be spelled '{}', got '{}'",
                TENANT_TAG_KEY, key
            )));
        }
        if !is_tag_key_valid(key) {
            return Err(TagClaimError::InvalidTag {
                key: key.clone(),
                reason: "unsupported characters in key".into(),
            });
        }

        let single = single_value(value).map_err(|reason| {
            if is_tenant {
                TagClaimError::InvalidTenantTag(reason)
            } else {
                TagClaimError::InvalidTag {
                    key: key.clone(),
                    reason,
                }
            }
        })?;

        if is_tenant {
            let tenant = TenantId::parse(single)
                .map_err(|e| TagClaimError::InvalidTenantTag(e.to_string()))?;
            tags.insert(TENANT_TAG_KEY, tenant.as_str());
        } else {
            if !is_tag_value_valid(single) {
                return Err(TagClaimError::InvalidTag {
                    key: key.clone(),
                    reason: "unsupported characters in value".into(),
                });
            }
            tags.insert(key.as_str(), single);
        }
    }

    if tags.tenant_id().is_none() {
        return Err(TagClaimError::MissingTenantTag(format!(
            "no '{}' principal tag",
            TENANT_TAG_KEY
        )));
    }

    if let Some(transitive) = namespaced.get(TRANSITIVE_TAG_KEYS_KEY) {
        let keys = transitive.as_array().ok_or_else(|| {
            TagClaimError::Malformed(format!("'{}' is not a list", TRANSITIVE_TAG_KEYS_KEY))
        })?;
        for key in keys {
            let key = key.as_str().ok_or_else(|| {
                TagClaimError::Malformed("transitive tag key is not a string".into())
            })?;
            if tags.get(key).is_none() {
                return Err(TagClaimError::InvalidTag {
                    key: key.to_string(),
                    reason: "transitive key has no matching principal tag".into(),
                });
            }
            tags.mark_transitive(key);
        }
    }

    Ok(tags)
}

fn single_value(value: &Value) -> Result<&str, String> {
    match value {
        Value::Array(values) if values.len() == 1 => values[0]
            .as_str()
            .ok_or_else(|| "value is not a string".to_string()),
        Value::Array(values) => Err(format!(
            "expected exactly one value, got {}",
            values.len()
        )),
        _ => Err("value must be a single-element list".into()),
    }
}

fn is_tag_key_valid(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_TAG_KEY_LEN
        && !key.to_ascii_lowercase().starts_with("aws:")
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_.:/=+-@".contains(c))
}

fn is_tag_value_valid(value: &str) -> bool {
    value.len() <= MAX_TAG_VALUE_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || " _.:/=+-@".contains(c))
}
