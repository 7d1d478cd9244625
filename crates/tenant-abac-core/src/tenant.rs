//! Tenant identifiers
//!
//! A `TenantId` is assigned out of band and embedded verbatim into resource
//! paths by the resource policy, so its alphabet is restricted to characters
//! that cannot alter path structure or act as policy wildcards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Longest accepted tenant id; matches the session tag value limit.
pub const MAX_TENANT_ID_LEN: usize = 256;

/// Opaque, path-safe tenant identifier (`^[A-Za-z0-9_-]+$`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse and validate a tenant id
    pub fn parse(value: impl Into<String>) -> Result<Self, ConfigError> {
        let value = value.into();
        if is_path_safe(&value) {
            Ok(Self(value))
        } else {
            Err(ConfigError::Invalid {
                key: "tenant_id".into(),
                reason: format!("'{}' must match ^[A-Za-z0-9_-]+$", value.escape_debug()),
            })
        }
    }

    /// Borrow the raw value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Check a value against the tenant id alphabet.
///
/// Also used for every session tag value that may be substituted into a
/// policy resource.
pub fn is_path_safe(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_TENANT_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
