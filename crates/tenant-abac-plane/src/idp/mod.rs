//! Identity-provider management
//!
//! One-time setup calls against the provider's management API: registering
//! the Claim Injector as a post-login action and registering the client
//! application whose id becomes the federation audience.
//!
//! ## Components
//!
//! - [`ManagementApi`]: the calls this system depends on, with an HTTP
//!   implementation ([`HttpManagementApi`]) and an in-memory one
//!   ([`InMemoryIdentityProvider`]) for tests and dry runs
//! - [`ActionRegistrar`]: drives the action through
//!   `Absent -> Created -> Deployed -> Bound`, verifying each step
//! - [`ClientRegistrar`]: upserts the client application by name

pub mod http;
pub mod memory;
pub mod registrar;

pub use http::{HttpManagementApi, RetryPolicy};
pub use memory::InMemoryIdentityProvider;
pub use registrar::{
    ActionRegistrar, ActionRegistration, ClientRegistrar, ClientRegistration, RegistrationError,
    RegistrationStage,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Trigger the Claim Injector runs on
pub const POST_LOGIN_TRIGGER: &str = "post-login";

/// Trigger version the action is written against
pub const POST_LOGIN_TRIGGER_VERSION: &str = "v3";

/// Default action name
pub const DEFAULT_ACTION_NAME: &str = "Tags Claim";

/// Default client application name
pub const DEFAULT_CLIENT_NAME: &str = "UI";

/// Binding reference type naming an action by id
pub const BINDING_REF_ACTION_ID: &str = "action_id";

/// Management API failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManagementError {
    /// Connection failure or timeout
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Provider error (status {status}): {message}")]
    Server { status: u16, message: String },

    /// The provider refused the request; retrying will not help
    #[error("Request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ManagementError {
    /// Only transport-level failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ManagementError::Transport(_)
                | ManagementError::RateLimited
                | ManagementError::Server { .. }
        )
    }
}

/// A trigger reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRef {
    pub id: String,
    pub version: String,
}

/// A trigger an action supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedTrigger {
    pub id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compatible_triggers: Vec<TriggerRef>,
}

impl SupportedTrigger {
    /// `post-login` / `v3`, compatible with itself
    pub fn post_login() -> Self {
        Self {
            id: POST_LOGIN_TRIGGER.into(),
            version: POST_LOGIN_TRIGGER_VERSION.into(),
            compatible_triggers: vec![TriggerRef {
                id: POST_LOGIN_TRIGGER.into(),
                version: POST_LOGIN_TRIGGER_VERSION.into(),
            }],
        }
    }

    fn same_trigger(&self, other: &SupportedTrigger) -> bool {
        self.id == other.id && self.version == other.version
    }
}

/// Desired state of an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionSpec {
    pub name: String,
    pub code: String,
    pub supported_triggers: Vec<SupportedTrigger>,
}

/// An action as the provider reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub supported_triggers: Vec<SupportedTrigger>,
    /// Build status, `built` once the code can be deployed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub all_changes_deployed: bool,
}

impl Action {
    /// Whether the stored code and triggers already match the desired action
    pub fn matches(&self, spec: &ActionSpec) -> bool {
        self.name == spec.name
            && self.code == spec.code
            && self.supported_triggers.len() == spec.supported_triggers.len()
            && spec
                .supported_triggers
                .iter()
                .all(|want| self.supported_triggers.iter().any(|have| have.same_trigger(want)))
    }

    /// Whether the provider finished building the current code
    pub fn is_built(&self) -> bool {
        self.status.as_deref().map_or(true, |s| s == "built")
    }
}

/// The action a binding points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundAction {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// A binding of an action to a trigger, as reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: String,
    pub action: BoundAction,
}

/// Reference to an action in a binding update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// One entry of a binding update; the update replaces the whole list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingUpdate {
    #[serde(rename = "ref")]
    pub reference: BindingRef,
    pub display_name: String,
}

impl BindingUpdate {
    /// Bind an action by id
    pub fn action_id(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            reference: BindingRef {
                kind: BINDING_REF_ACTION_ID.into(),
                value: id.into(),
            },
            display_name: display_name.into(),
        }
    }

    /// Re-send an existing binding unchanged
    pub fn preserve(binding: &TriggerBinding) -> Self {
        Self::action_id(&binding.action.id, &binding.display_name)
    }
}

/// Token signing settings of a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtConfiguration {
    pub alg: String,
}

/// Desired state of a client application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSpec {
    pub name: String,
    pub callbacks: Vec<String>,
    pub grant_types: Vec<String>,
    pub jwt_configuration: JwtConfiguration,
}

impl ClientSpec {
    /// Browser client using the implicit grant with RS256-signed tokens
    pub fn implicit(name: impl Into<String>, callbacks: Vec<String>) -> Self {
        Self {
            name: name.into(),
            callbacks,
            grant_types: vec!["implicit".into()],
            jwt_configuration: JwtConfiguration { alg: "RS256".into() },
        }
    }
}

impl Default for ClientSpec {
    fn default() -> Self {
        Self::implicit(DEFAULT_CLIENT_NAME, vec!["https://localhost".into()])
    }
}

/// A client application as the provider reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    pub name: String,
    #[serde(default)]
    pub callbacks: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_configuration: Option<JwtConfiguration>,
}

impl Client {
    /// Whether the client already has the desired settings
    pub fn matches(&self, spec: &ClientSpec) -> bool {
        self.name == spec.name
            && self.callbacks == spec.callbacks
            && self.grant_types == spec.grant_types
            && self.jwt_configuration.as_ref() == Some(&spec.jwt_configuration)
    }
}

/// Identity-provider management operations
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Actions whose name equals `name`
    async fn list_actions(&self, name: &str) -> Result<Vec<Action>, ManagementError>;

    async fn get_action(&self, id: &str) -> Result<Action, ManagementError>;

    async fn create_action(&self, spec: &ActionSpec) -> Result<Action, ManagementError>;

    async fn update_action(&self, id: &str, spec: &ActionSpec) -> Result<Action, ManagementError>;

    /// Deploy the action's current code
    async fn deploy_action(&self, id: &str) -> Result<(), ManagementError>;

    /// Bindings on a trigger, in execution order
    async fn trigger_bindings(&self, trigger: &str) -> Result<Vec<TriggerBinding>, ManagementError>;

    /// Replace the bindings on a trigger
    async fn set_trigger_bindings(
        &self,
        trigger: &str,
        bindings: &[BindingUpdate],
    ) -> Result<Vec<TriggerBinding>, ManagementError>;

    async fn list_clients(&self) -> Result<Vec<Client>, ManagementError>;

    async fn create_client(&self, spec: &ClientSpec) -> Result<Client, ManagementError>;

    async fn update_client(&self, id: &str, spec: &ClientSpec) -> Result<Client, ManagementError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binding_update_wire_shape() {
        let update = BindingUpdate::action_id("act-1", "Tags Claim");
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"ref": {"type": "action_id", "value": "act-1"}, "display_name": "Tags Claim"})
        );
    }

    #[test]
    fn test_default_client_spec() {
        let spec = ClientSpec::default();
        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            json!({
                "name": "UI",
                "callbacks": ["https://localhost"],
                "grant_types": ["implicit"],
                "jwt_configuration": {"alg": "RS256"}
            })
        );
    }

    #[test]
    fn test_action_matches_ignores_trigger_order_but_not_code() {
        let spec = ActionSpec {
            name: DEFAULT_ACTION_NAME.into(),
            code: "exports.onExecutePostLogin = async () => {};".into(),
            supported_triggers: vec![SupportedTrigger::post_login()],
        };
        let mut action = Action {
            id: "act-1".into(),
            name: spec.name.clone(),
            code: spec.code.clone(),
            supported_triggers: vec![SupportedTrigger {
                compatible_triggers: vec![],
                ..SupportedTrigger::post_login()
            }],
            status: Some("built".into()),
            all_changes_deployed: true,
        };
        assert!(action.matches(&spec));

        action.code.push(' ');
        assert!(!action.matches(&spec));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ManagementError::RateLimited.is_retryable());
        assert!(ManagementError::Transport("reset".into()).is_retryable());
        assert!(ManagementError::Server { status: 503, message: String::new() }.is_retryable());
        assert!(!ManagementError::Rejected { status: 400, message: String::new() }.is_retryable());
        assert!(!ManagementError::NotFound("act".into()).is_retryable());
    }

    #[test]
    fn test_action_deserializes_provider_shape() {
        let action: Action = serde_json::from_value(json!({
            "id": "910b1053-577f-4d81-a8c8-020e7319a38a",
            "name": "Tags Claim",
            "supported_triggers": [{"id": "post-login", "version": "v3"}],
            "code": "exports.onExecutePostLogin = async (event, api) => {};",
            "status": "built",
            "all_changes_deployed": false,
            "runtime": "node18"
        }))
        .unwrap();
        assert!(action.is_built());
        assert!(!action.all_changes_deployed);
    }
}
