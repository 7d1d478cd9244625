//! Idempotent registration of the Claim Injector and the client application
//!
//! The action moves through `Absent -> Created -> Deployed -> Bound`. Every
//! transition is followed by a read-back from the provider, and a failed
//! read-back stops the run with [`RegistrationError::ClaimInjectionFailure`].
//! Re-running against a provider that already has the action converges on the
//! same final state: one action with this name, deployed, and exactly one
//! binding for it on the trigger, with every other binding left in place.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use tenant_abac_core::{ClaimInjector, IsolationConfig, IsolationError};

use super::{
    Action, ActionSpec, BindingUpdate, Client, ClientSpec, ManagementApi, ManagementError,
    SupportedTrigger, TriggerBinding, DEFAULT_ACTION_NAME, POST_LOGIN_TRIGGER,
};

/// Registration stages, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStage {
    Absent,
    Created,
    Deployed,
    Bound,
}

impl RegistrationStage {
    /// The stage that follows this one
    pub fn next(self) -> Option<Self> {
        match self {
            RegistrationStage::Absent => Some(RegistrationStage::Created),
            RegistrationStage::Created => Some(RegistrationStage::Deployed),
            RegistrationStage::Deployed => Some(RegistrationStage::Bound),
            RegistrationStage::Bound => None,
        }
    }
}

impl fmt::Display for RegistrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationStage::Absent => "absent",
            RegistrationStage::Created => "created",
            RegistrationStage::Deployed => "deployed",
            RegistrationStage::Bound => "bound",
        };
        f.write_str(name)
    }
}

/// Registration failures
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Deploy-time configuration is unusable; nothing was sent
    #[error("Configuration error: {0}")]
    Configuration(#[from] IsolationError),

    #[error("Management API error: {0}")]
    Management(#[from] ManagementError),

    #[error("{count} actions named '{name}' exist; refusing to choose one")]
    DuplicateAction { name: String, count: usize },

    #[error("{count} clients named '{name}' exist; refusing to choose one")]
    DuplicateClient { name: String, count: usize },

    /// A transition did not take effect
    #[error("Claim injector registration failed at {stage}: {reason}")]
    ClaimInjectionFailure {
        stage: RegistrationStage,
        reason: String,
    },
}

impl RegistrationError {
    /// Whether re-running the registration could succeed unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistrationError::Management(e) if e.is_retryable())
    }

    fn failed(stage: RegistrationStage, reason: impl Into<String>) -> Self {
        RegistrationError::ClaimInjectionFailure {
            stage,
            reason: reason.into(),
        }
    }
}

/// Outcome of a completed action registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRegistration {
    pub action_id: String,
    pub action_name: String,
    pub stage: RegistrationStage,
    /// A new action was created
    pub created: bool,
    /// An existing action's code or triggers were replaced
    pub updated: bool,
    /// A deploy was issued
    pub deployed: bool,
    /// The trigger bindings were rewritten
    pub rebound: bool,
}

/// Walks the action state machine
struct Progress {
    stage: RegistrationStage,
}

impl Progress {
    fn advance(&mut self, to: RegistrationStage, action_id: &str) -> Result<(), RegistrationError> {
        if self.stage.next() != Some(to) {
            return Err(RegistrationError::failed(
                to,
                format!("illegal transition from {} to {}", self.stage, to),
            ));
        }
        info!(action_id = %action_id, from = %self.stage, to = %to, "Claim injector registration advanced");
        self.stage = to;
        Ok(())
    }
}

/// Registers the Claim Injector as a post-login action
pub struct ActionRegistrar {
    api: Arc<dyn ManagementApi>,
    injector: ClaimInjector,
    name: String,
    build_checks: u32,
    build_interval: Duration,
}

impl ActionRegistrar {
    pub fn new(api: Arc<dyn ManagementApi>, injector: ClaimInjector) -> Self {
        Self {
            api,
            injector,
            name: DEFAULT_ACTION_NAME.into(),
            build_checks: 10,
            build_interval: Duration::from_millis(500),
        }
    }

    /// Registrar for a deployment's configured tenant
    ///
    /// Fails before any call is made if the tenant id is missing or malformed.
    pub fn from_config(
        api: Arc<dyn ManagementApi>,
        config: &IsolationConfig,
    ) -> Result<Self, RegistrationError> {
        Ok(Self::new(api, ClaimInjector::from_config(config)?))
    }

    /// Register under a different action name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// How long to wait for the provider to build new code before deploying
    pub fn with_build_wait(mut self, checks: u32, interval: Duration) -> Self {
        self.build_checks = checks.max(1);
        self.build_interval = interval;
        self
    }

    /// The desired action
    pub fn spec(&self) -> Result<ActionSpec, RegistrationError> {
        Ok(ActionSpec {
            name: self.name.clone(),
            code: self.injector.action_source()?,
            supported_triggers: vec![SupportedTrigger::post_login()],
        })
    }

    /// Bring the provider to the registered state
    pub async fn register(&self) -> Result<ActionRegistration, RegistrationError> {
        let spec = self.spec()?;
        let result = self.run(&spec).await;
        if let Err(e) = &result {
            warn!(action = %self.name, error = %e, "Claim injector registration failed");
        }
        result
    }

    async fn run(&self, spec: &ActionSpec) -> Result<ActionRegistration, RegistrationError> {
        let mut progress = Progress {
            stage: RegistrationStage::Absent,
        };
        let mut outcome = ActionRegistration {
            action_id: String::new(),
            action_name: spec.name.clone(),
            stage: RegistrationStage::Absent,
            created: false,
            updated: false,
            deployed: false,
            rebound: false,
        };

        // Absent -> Created
        let existing = self.api.list_actions(&spec.name).await?;
        let action = match existing.as_slice() {
            [] => {
                outcome.created = true;
                self.api.create_action(spec).await?
            }
            [current] if current.matches(spec) => current.clone(),
            [current] => {
                outcome.updated = true;
                self.api.update_action(&current.id, spec).await?
            }
            many => {
                return Err(RegistrationError::DuplicateAction {
                    name: spec.name.clone(),
                    count: many.len(),
                })
            }
        };
        let action = self.verify_created(&action.id, spec).await?;
        progress.advance(RegistrationStage::Created, &action.id)?;

        // Created -> Deployed
        if !action.all_changes_deployed {
            self.wait_built(&action.id).await?;
            self.api.deploy_action(&action.id).await?;
            outcome.deployed = true;
        }
        let deployed = self.api.get_action(&action.id).await?;
        if !deployed.all_changes_deployed {
            return Err(RegistrationError::failed(
                RegistrationStage::Deployed,
                "provider reports undeployed changes after deploy",
            ));
        }
        progress.advance(RegistrationStage::Deployed, &action.id)?;

        // Deployed -> Bound
        let bindings = self.api.trigger_bindings(POST_LOGIN_TRIGGER).await?;
        if let Some(updates) = rebind(&bindings, &action, &spec.name) {
            debug!(bindings = updates.len(), "Rewriting trigger bindings");
            self.api
                .set_trigger_bindings(POST_LOGIN_TRIGGER, &updates)
                .await?;
            outcome.rebound = true;
        }
        let after = self.api.trigger_bindings(POST_LOGIN_TRIGGER).await?;
        verify_bound(&bindings, &after, &action, &spec.name)?;
        progress.advance(RegistrationStage::Bound, &action.id)?;

        outcome.action_id = action.id;
        outcome.stage = progress.stage;
        info!(
            action_id = %outcome.action_id,
            created = outcome.created,
            updated = outcome.updated,
            deployed = outcome.deployed,
            rebound = outcome.rebound,
            "Claim injector registered"
        );
        Ok(outcome)
    }

    async fn verify_created(&self, id: &str, spec: &ActionSpec) -> Result<Action, RegistrationError> {
        let action = self.api.get_action(id).await?;
        if !action.matches(spec) {
            return Err(RegistrationError::failed(
                RegistrationStage::Created,
                "stored action does not match the requested code and trigger",
            ));
        }
        Ok(action)
    }

    async fn wait_built(&self, id: &str) -> Result<(), RegistrationError> {
        for check in 1..=self.build_checks {
            let action = self.api.get_action(id).await?;
            if action.is_built() {
                return Ok(());
            }
            debug!(action_id = %id, check, status = ?action.status, "Waiting for action build");
            if check < self.build_checks {
                tokio::time::sleep(self.build_interval).await;
            }
        }
        Err(RegistrationError::failed(
            RegistrationStage::Deployed,
            "action did not finish building",
        ))
    }
}

fn is_ours(binding: &TriggerBinding, action: &Action, name: &str) -> bool {
    binding.action.id == action.id || binding.action.name == name
}

/// New binding list, or `None` if ours is already bound exactly once
///
/// Our entry takes the position of the first binding it replaces, or goes
/// last. Every other binding keeps its order.
fn rebind(bindings: &[TriggerBinding], action: &Action, name: &str) -> Option<Vec<BindingUpdate>> {
    let ours: Vec<&TriggerBinding> = bindings.iter().filter(|b| is_ours(b, action, name)).collect();
    if let [only] = ours.as_slice() {
        if only.action.id == action.id {
            return None;
        }
    }

    let mut updates = Vec::with_capacity(bindings.len() + 1);
    let mut placed = false;
    for binding in bindings {
        if is_ours(binding, action, name) {
            if !placed {
                updates.push(BindingUpdate::action_id(&action.id, name));
                placed = true;
            }
        } else {
            updates.push(BindingUpdate::preserve(binding));
        }
    }
    if !placed {
        updates.push(BindingUpdate::action_id(&action.id, name));
    }
    Some(updates)
}

fn verify_bound(
    before: &[TriggerBinding],
    after: &[TriggerBinding],
    action: &Action,
    name: &str,
) -> Result<(), RegistrationError> {
    let ours = after.iter().filter(|b| is_ours(b, action, name)).count();
    let exact = after.iter().filter(|b| b.action.id == action.id).count();
    if ours != 1 || exact != 1 {
        return Err(RegistrationError::failed(
            RegistrationStage::Bound,
            format!("expected exactly one binding for '{}', found {}", name, ours),
        ));
    }

    let others = |list: &[TriggerBinding]| -> Vec<String> {
        list.iter()
            .filter(|b| !is_ours(b, action, name))
            .map(|b| b.action.id.clone())
            .collect()
    };
    if others(before) != others(after) {
        return Err(RegistrationError::failed(
            RegistrationStage::Bound,
            "other bindings on the trigger were not preserved",
        ));
    }
    Ok(())
}

/// Outcome of a client registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientRegistration {
    pub client_id: String,
    pub name: String,
    pub created: bool,
    pub updated: bool,
}

/// Registers the client application whose id is the federation audience
pub struct ClientRegistrar {
    api: Arc<dyn ManagementApi>,
    spec: ClientSpec,
}

impl ClientRegistrar {
    pub fn new(api: Arc<dyn ManagementApi>, spec: ClientSpec) -> Self {
        Self { api, spec }
    }

    /// The desired client
    pub fn spec(&self) -> &ClientSpec {
        &self.spec
    }

    /// Create the client, or bring the one with this name up to date
    pub async fn register(&self) -> Result<ClientRegistration, RegistrationError> {
        let existing: Vec<Client> = self
            .api
            .list_clients()
            .await?
            .into_iter()
            .filter(|c| c.name == self.spec.name)
            .collect();

        let (client, created, updated) = match existing.as_slice() {
            [] => (self.api.create_client(&self.spec).await?, true, false),
            [current] if current.matches(&self.spec) => (current.clone(), false, false),
            [current] => (
                self.api.update_client(&current.client_id, &self.spec).await?,
                false,
                true,
            ),
            many => {
                return Err(RegistrationError::DuplicateClient {
                    name: self.spec.name.clone(),
                    count: many.len(),
                })
            }
        };

        if client.client_id.is_empty() || !client.matches(&self.spec) {
            return Err(ManagementError::InvalidResponse(
                "client returned by the provider does not match the request".into(),
            )
            .into());
        }

        info!(client_id = %client.client_id, name = %client.name, created, updated, "Client registered");
        Ok(ClientRegistration {
            client_id: client.client_id,
            name: client.name,
            created,
            updated,
        })
    }
}
