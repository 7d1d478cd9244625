//! Deployment configuration
//!
//! One immutable value holding every process-wide constant (provider
//! domain, client id, tenant id, bucket). It is built once at start-up and
//! passed to each component's constructor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::claims::DEFAULT_CLAIMS_NAMESPACE;
use crate::error::ConfigError;
use crate::session::SessionPrincipal;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TENANT_ABAC_";

/// Shortest session the exchange will issue, in seconds
pub const MIN_SESSION_SECONDS: u64 = 900;

/// Longest session the exchange will issue, in seconds
pub const MAX_SESSION_SECONDS: u64 = 43_200;

/// Tenant isolation deployment configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationConfig {
    /// Identity provider domain, e.g. `tenant.us.auth0.com`
    pub oidc_domain: String,

    /// Client identifier tokens must be issued to
    pub client_id: String,

    /// Tenant bound to this identity-provider instance
    #[serde(default)]
    pub tenant_id: Option<String>,

    /// Custom claim namespace carrying session tags
    #[serde(default = "default_claims_namespace")]
    pub claims_namespace: String,

    /// Storage bucket shared by all tenants
    #[serde(default = "default_bucket_name")]
    pub bucket_name: String,

    /// Account owning the bucket and role
    #[serde(default = "default_account_id")]
    pub account_id: String,

    /// Name of the federated role
    #[serde(default = "default_role_name")]
    pub role_name: String,

    /// Actions the resource policy grants on a tenant's prefix
    #[serde(default = "default_allowed_actions")]
    pub allowed_actions: Vec<String>,

    /// Cap on issued credential lifetime, in seconds
    #[serde(default = "default_max_session_seconds")]
    pub max_session_seconds: u64,

    /// Clock skew tolerated on token exp/nbf, in seconds
    #[serde(default)]
    pub clock_leeway_seconds: u64,

    /// How long fetched signing keys are cached, in seconds
    #[serde(default = "default_jwks_cache_seconds")]
    pub jwks_cache_seconds: u64,

    /// Minimum time between forced key refreshes triggered by unknown key ids
    #[serde(default = "default_jwks_refresh_cooldown_seconds")]
    pub jwks_refresh_cooldown_seconds: u64,

    /// Accepted identity token signing algorithms
    #[serde(default = "default_allowed_algorithms")]
    pub allowed_algorithms: Vec<String>,
}

fn default_claims_namespace() -> String {
    DEFAULT_CLAIMS_NAMESPACE.to_string()
}

fn default_bucket_name() -> String {
    "tenant-data".to_string()
}

fn default_account_id() -> String {
    "000000000000".to_string()
}

fn default_role_name() -> String {
    "tenant-scoped-access".to_string()
}

fn default_allowed_actions() -> Vec<String> {
    vec!["s3:GetObject".to_string()]
}

fn default_max_session_seconds() -> u64 {
    3600
}

fn default_jwks_cache_seconds() -> u64 {
    3600
}

fn default_jwks_refresh_cooldown_seconds() -> u64 {
    60
}

fn default_allowed_algorithms() -> Vec<String> {
    vec!["RS256".to_string()]
}

impl IsolationConfig {
    /// Configuration with defaults for everything but the provider and client
    pub fn for_domain(oidc_domain: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            oidc_domain: oidc_domain.into(),
            client_id: client_id.into(),
            tenant_id: None,
            claims_namespace: default_claims_namespace(),
            bucket_name: default_bucket_name(),
            account_id: default_account_id(),
            role_name: default_role_name(),
            allowed_actions: default_allowed_actions(),
            max_session_seconds: default_max_session_seconds(),
            clock_leeway_seconds: 0,
            jwks_cache_seconds: default_jwks_cache_seconds(),
            jwks_refresh_cooldown_seconds: default_jwks_refresh_cooldown_seconds(),
            allowed_algorithms: default_allowed_algorithms(),
        }
    }

    /// Set the tenant
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Set the bucket
    pub fn with_bucket(mut self, bucket_name: impl Into<String>) -> Self {
        self.bucket_name = bucket_name.into();
        self
    }

    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        Self::from_vars(&vars)
    }

    /// Load from a prefixed variable map
    ///
    /// `TENANT_ABAC_CLIENT_ID` may be absent for commands that only talk to
    /// the identity provider; `validate` catches it everywhere else.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            vars.get(&format!("{}{}", ENV_PREFIX, name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let parse_u64 = |name: &str, default: u64| -> Result<u64, ConfigError> {
            match get(name) {
                Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                    key: format!("{}{}", ENV_PREFIX, name),
                    reason: format!("'{}' is not a non-negative integer", raw),
                }),
                None => Ok(default),
            }
        };
        let parse_list = |name: &str, default: Vec<String>| -> Vec<String> {
            get(name)
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(default)
        };

        let oidc_domain = get("OIDC_DOMAIN")
            .ok_or_else(|| ConfigError::Missing(format!("{}OIDC_DOMAIN", ENV_PREFIX)))?;

        let mut config = Self::for_domain(oidc_domain, get("CLIENT_ID").unwrap_or_default());
        config.tenant_id = get("TENANT_ID");
        if let Some(namespace) = get("CLAIMS_NAMESPACE") {
            config.claims_namespace = namespace;
        }
        if let Some(bucket) = get("BUCKET_NAME") {
            config.bucket_name = bucket;
        }
        if let Some(account) = get("ACCOUNT_ID") {
            config.account_id = account;
        }
        if let Some(role) = get("ROLE_NAME") {
            config.role_name = role;
        }
        config.allowed_actions = parse_list("ALLOWED_ACTIONS", default_allowed_actions());
        config.max_session_seconds =
            parse_u64("MAX_SESSION_SECONDS", default_max_session_seconds())?;
        config.clock_leeway_seconds = parse_u64("CLOCK_LEEWAY_SECONDS", 0)?;
        config.jwks_cache_seconds = parse_u64("JWKS_CACHE_SECONDS", default_jwks_cache_seconds())?;
        config.jwks_refresh_cooldown_seconds = parse_u64(
            "JWKS_REFRESH_COOLDOWN_SECONDS",
            default_jwks_refresh_cooldown_seconds(),
        )?;
        config.allowed_algorithms =
            parse_list("ALLOWED_ALGORITHMS", default_allowed_algorithms());

        Ok(config)
    }

    /// Check everything the trust anchor and policy depend on
    ///
    /// The tenant id is not checked here; the trust anchor is tenant-agnostic
    /// and the claim injector validates it when built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: String| ConfigError::Invalid {
            key: key.to_string(),
            reason,
        };

        if self.oidc_domain.is_empty()
            || self.oidc_domain.contains("://")
            || self.oidc_domain.contains('/')
            || self.oidc_domain.contains(char::is_whitespace)
        {
            return Err(invalid(
                "oidc_domain",
                format!("'{}' must be a bare host name", self.oidc_domain),
            ));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::Missing(format!("{}CLIENT_ID", ENV_PREFIX)));
        }
        if !is_valid_bucket_name(&self.bucket_name) {
            return Err(invalid(
                "bucket_name",
                format!("'{}' is not a valid bucket name", self.bucket_name),
            ));
        }
        if self.account_id.len() != 12 || !self.account_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("account_id", "must be 12 digits".into()));
        }
        if self.role_name.is_empty() || self.role_name.len() > 64 {
            return Err(invalid("role_name", "must be 1-64 characters".into()));
        }
        if self.allowed_actions.is_empty() {
            return Err(invalid("allowed_actions", "at least one action required".into()));
        }
        if !(MIN_SESSION_SECONDS..=MAX_SESSION_SECONDS).contains(&self.max_session_seconds) {
            return Err(invalid(
                "max_session_seconds",
                format!(
                    "{} outside {}..={}",
                    self.max_session_seconds, MIN_SESSION_SECONDS, MAX_SESSION_SECONDS
                ),
            ));
        }
        if self.allowed_algorithms.is_empty() {
            return Err(invalid("allowed_algorithms", "at least one algorithm required".into()));
        }
        for alg in &self.allowed_algorithms {
            if alg.eq_ignore_ascii_case("none") || alg.starts_with("HS") {
                return Err(invalid(
                    "allowed_algorithms",
                    format!("'{}' cannot be used with published keys", alg),
                ));
            }
        }
        Ok(())
    }

    /// Expected `iss` claim
    pub fn issuer(&self) -> String {
        format!("https://{}/", self.oidc_domain)
    }

    /// Provider identifier used in trust-policy condition keys
    pub fn provider_uri(&self) -> String {
        format!("{}/", self.oidc_domain)
    }

    /// OIDC discovery document URL
    pub fn discovery_url(&self) -> String {
        format!("https://{}/.well-known/openid-configuration", self.oidc_domain)
    }

    /// Federated role identifier
    pub fn role_arn(&self) -> String {
        format!("arn:aws:iam::{}:role/{}", self.account_id, self.role_name)
    }

    /// OIDC provider resource identifier
    pub fn provider_arn(&self) -> String {
        format!(
            "arn:aws:iam::{}:oidc-provider/{}",
            self.account_id,
            self.provider_uri()
        )
    }

    /// Trust-policy condition key for the token audience
    pub fn audience_condition_key(&self) -> String {
        format!("{}:aud", self.provider_uri())
    }

    /// The federated principal credentials are issued for
    pub fn session_principal(&self) -> SessionPrincipal {
        SessionPrincipal {
            role_arn: self.role_arn(),
            provider: self.provider_uri(),
            audience_condition_key: self.audience_condition_key(),
            audience: self.client_id.clone(),
            propagate_session_tags: true,
        }
    }

    /// Credential lifetime cap
    pub fn max_session(&self) -> Duration {
        Duration::from_secs(self.max_session_seconds)
    }

    /// Signing key cache lifetime
    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_seconds)
    }
}

/// Check a bucket name against the storage naming rules
///
/// Lowercase letters, digits, `-` and `.`, 3 to 63 characters, no `/`.
pub fn is_valid_bucket_name(name: &str) -> bool {
    (3..=63).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
        && name.as_bytes()[0].is_ascii_alphanumeric()
        && name.as_bytes()[name.len() - 1].is_ascii_alphanumeric()
        && !name.contains("..")
}
