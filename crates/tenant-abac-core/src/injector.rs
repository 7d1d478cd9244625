//! Claim Injector
//!
//! Runs in the identity provider's post-login pipeline and attaches the
//! deployment's tenant to every issued identity token, before signing. The
//! tenant is a deploy-time constant; nothing from the login event or the
//! caller can influence the value written.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::claims::TenantClaim;
use crate::config::IsolationConfig;
use crate::error::{ConfigError, IsolationError, Result};
use crate::tenant::TenantId;

/// Post-login event as produced by the identity provider
///
/// Platform-generated and trusted. It deliberately has no tenant field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginEvent {
    /// Provider user id, e.g. `auth0|63f...`
    pub user_id: String,
    /// Client application the login is for
    pub client_id: String,
    /// Connection (identity source) used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
}

/// A mutation of the in-flight identity token claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimMutation {
    /// Custom claim name
    pub namespace: String,
    /// Value written under the namespace
    pub value: Value,
}

impl ClaimMutation {
    /// Render as `{"<namespace>": value}`
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(self.namespace.clone(), self.value.clone());
        Value::Object(map)
    }
}

/// Attaches the configured tenant claim to identity tokens
#[derive(Debug, Clone)]
pub struct ClaimInjector {
    configured_tenant: Option<String>,
    namespace: String,
}

impl ClaimInjector {
    /// Create an injector from a raw configured value
    ///
    /// The value is checked on every injection, so a bad constant fails each
    /// login instead of issuing an unscoped token.
    pub fn new(configured_tenant: Option<String>, namespace: impl Into<String>) -> Self {
        Self {
            configured_tenant,
            namespace: namespace.into(),
        }
    }

    /// Build the injector for a deployment, failing if the tenant is unusable
    pub fn from_config(config: &IsolationConfig) -> Result<Self> {
        let raw = config
            .tenant_id
            .clone()
            .ok_or_else(|| ConfigError::Missing("TENANT_ABAC_TENANT_ID".into()))?;
        TenantId::parse(raw.as_str())?;
        validate_namespace(&config.claims_namespace)?;
        Ok(Self::new(Some(raw), config.claims_namespace.clone()))
    }

    /// Claim namespace written to
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The tenant claim this injector writes
    pub fn tenant_claim(&self) -> Result<TenantClaim> {
        let raw = self.configured_tenant.as_deref().ok_or_else(|| {
            IsolationError::ClaimInjection("no tenant id configured".into())
        })?;
        let tenant = TenantId::parse(raw)
            .map_err(|e| IsolationError::ClaimInjection(e.to_string()))?;
        Ok(TenantClaim::new(tenant))
    }

    /// Compute the claim mutation for a login
    pub fn mutation(&self, event: &LoginEvent) -> Result<ClaimMutation> {
        let claim = match self.tenant_claim() {
            Ok(claim) => claim,
            Err(e) => {
                warn!(user = %event.user_id, error = %e, "Refusing to inject tenant claim");
                return Err(e);
            }
        };
        debug!(
            user = %event.user_id,
            client_id = %event.client_id,
            tenant_id = %claim.tenant_id(),
            "Injecting tenant claim"
        );
        Ok(ClaimMutation {
            namespace: self.namespace.clone(),
            value: claim.to_value(),
        })
    }

    /// Apply the mutation to in-flight token claims
    ///
    /// Any existing value under the namespace is replaced, never merged. On
    /// error the claims are left untouched and the login must fail.
    pub fn apply(&self, event: &LoginEvent, claims: &mut Map<String, Value>) -> Result<()> {
        let mutation = self.mutation(event)?;
        claims.insert(mutation.namespace, mutation.value);
        Ok(())
    }

    /// Render the post-login action deployed to the identity provider
    pub fn action_source(&self) -> Result<String> {
        let claim = self.tenant_claim()?;
        let namespace = serde_json::to_string(&self.namespace)?;
        let tags = serde_json::to_string_pretty(&claim.to_value())?;
        let tags = tags.replace('\n', "\n  ");

        Ok(format!(
            "exports.onExecutePostLogin = async (event, api) => {{\n  \
             const tags = {tags};\n  \
             api.idToken.setCustomClaim({namespace}, tags);\n\
             }};\n"
        ))
    }
}

fn validate_namespace(namespace: &str) -> std::result::Result<(), ConfigError> {
    let ok = namespace
        .strip_prefix("https://")
        .map(|rest| !rest.is_empty() && !rest.contains(char::is_whitespace))
        .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key: "claims_namespace".into(),
            reason: format!("'{}' must be an https URI", namespace),
        })
    }
}
