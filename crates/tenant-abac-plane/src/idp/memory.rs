//! In-memory identity provider
//!
//! Implements the management API against local state, with hooks for
//! injecting failures and for seeding pre-existing actions, bindings and
//! clients. Used by tests and by dry-run registration.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::{
    Action, ActionSpec, BindingUpdate, BoundAction, Client, ClientSpec, ManagementApi,
    ManagementError, TriggerBinding, BINDING_REF_ACTION_ID,
};

#[derive(Debug, Default)]
struct State {
    actions: Vec<Action>,
    bindings: HashMap<String, Vec<TriggerBinding>>,
    clients: Vec<Client>,
    failures: HashMap<&'static str, VecDeque<ManagementError>>,
    calls: HashMap<&'static str, usize>,
    ignore_deploys: bool,
}

impl State {
    fn enter(&mut self, op: &'static str) -> Result<(), ManagementError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn action_mut(&mut self, id: &str) -> Result<&mut Action, ManagementError> {
        self.actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| ManagementError::NotFound(format!("action {}", id)))
    }
}

/// Management API backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryIdentityProvider {
    state: Mutex<State>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next call to `op` (the trait method name) with `error`
    pub fn fail_next(&self, op: &'static str, error: ManagementError) {
        self.state().failures.entry(op).or_default().push_back(error);
    }

    /// Accept deploy calls without marking anything deployed
    pub fn ignore_deploys(&self) {
        self.state().ignore_deploys = true;
    }

    /// Number of calls made to `op`, failed ones included
    pub fn calls(&self, op: &str) -> usize {
        self.state().calls.get(op).copied().unwrap_or(0)
    }

    /// Seed an action, returning its id
    pub fn insert_action(&self, name: &str, code: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.state().actions.push(Action {
            id: id.clone(),
            name: name.into(),
            code: code.into(),
            supported_triggers: Vec::new(),
            status: Some("built".into()),
            all_changes_deployed: true,
        });
        id
    }

    /// Seed a binding on a trigger
    pub fn insert_binding(&self, trigger: &str, action_id: &str, display_name: &str) {
        let mut state = self.state();
        let name = state
            .actions
            .iter()
            .find(|a| a.id == action_id)
            .map(|a| a.name.clone())
            .unwrap_or_default();
        state
            .bindings
            .entry(trigger.into())
            .or_default()
            .push(TriggerBinding {
                id: Some(Uuid::new_v4().to_string()),
                display_name: display_name.into(),
                action: BoundAction {
                    id: action_id.into(),
                    name,
                },
            });
    }

    /// Seed a client, returning its id
    pub fn insert_client(&self, spec: &ClientSpec) -> String {
        let client = new_client(spec);
        let id = client.client_id.clone();
        self.state().clients.push(client);
        id
    }

    /// Snapshot of the actions
    pub fn actions(&self) -> Vec<Action> {
        self.state().actions.clone()
    }

    /// Snapshot of a trigger's bindings
    pub fn bindings(&self, trigger: &str) -> Vec<TriggerBinding> {
        self.state().bindings.get(trigger).cloned().unwrap_or_default()
    }

    /// Snapshot of the clients
    pub fn clients(&self) -> Vec<Client> {
        self.state().clients.clone()
    }
}

fn new_client(spec: &ClientSpec) -> Client {
    Client {
        client_id: Uuid::new_v4().simple().to_string(),
        name: spec.name.clone(),
        callbacks: spec.callbacks.clone(),
        grant_types: spec.grant_types.clone(),
        jwt_configuration: Some(spec.jwt_configuration.clone()),
    }
}

#[async_trait]
impl ManagementApi for InMemoryIdentityProvider {
    async fn list_actions(&self, name: &str) -> Result<Vec<Action>, ManagementError> {
        let mut state = self.state();
        state.enter("list_actions")?;
        Ok(state.actions.iter().filter(|a| a.name == name).cloned().collect())
    }

    async fn get_action(&self, id: &str) -> Result<Action, ManagementError> {
        let mut state = self.state();
        state.enter("get_action")?;
        state.action_mut(id).map(|a| a.clone())
    }

    async fn create_action(&self, spec: &ActionSpec) -> Result<Action, ManagementError> {
        let mut state = self.state();
        state.enter("create_action")?;
        let action = Action {
            id: Uuid::new_v4().to_string(),
            name: spec.name.clone(),
            code: spec.code.clone(),
            supported_triggers: spec.supported_triggers.clone(),
            status: Some("built".into()),
            all_changes_deployed: false,
        };
        state.actions.push(action.clone());
        Ok(action)
    }

    async fn update_action(&self, id: &str, spec: &ActionSpec) -> Result<Action, ManagementError> {
        let mut state = self.state();
        state.enter("update_action")?;
        let action = state.action_mut(id)?;
        action.name = spec.name.clone();
        action.code = spec.code.clone();
        action.supported_triggers = spec.supported_triggers.clone();
        action.all_changes_deployed = false;
        Ok(action.clone())
    }

    async fn deploy_action(&self, id: &str) -> Result<(), ManagementError> {
        let mut state = self.state();
        state.enter("deploy_action")?;
        let ignore = state.ignore_deploys;
        let action = state.action_mut(id)?;
        if !ignore {
            action.all_changes_deployed = true;
        }
        Ok(())
    }

    async fn trigger_bindings(&self, trigger: &str) -> Result<Vec<TriggerBinding>, ManagementError> {
        let mut state = self.state();
        state.enter("trigger_bindings")?;
        Ok(state.bindings.get(trigger).cloned().unwrap_or_default())
    }

    async fn set_trigger_bindings(
        &self,
        trigger: &str,
        bindings: &[BindingUpdate],
    ) -> Result<Vec<TriggerBinding>, ManagementError> {
        let mut state = self.state();
        state.enter("set_trigger_bindings")?;

        let mut resolved = Vec::with_capacity(bindings.len());
        for update in bindings {
            let action = match update.reference.kind.as_str() {
                BINDING_REF_ACTION_ID => state.actions.iter().find(|a| a.id == update.reference.value),
                "action_name" => state.actions.iter().find(|a| a.name == update.reference.value),
                other => {
                    return Err(ManagementError::Rejected {
                        status: 400,
                        message: format!("unknown binding ref type '{}'", other),
                    })
                }
            }
            .ok_or_else(|| ManagementError::Rejected {
                status: 400,
                message: format!("no action for ref '{}'", update.reference.value),
            })?;
            if !action.all_changes_deployed {
                return Err(ManagementError::Rejected {
                    status: 400,
                    message: format!("action '{}' is not deployed", action.name),
                });
            }
            resolved.push(TriggerBinding {
                id: Some(Uuid::new_v4().to_string()),
                display_name: update.display_name.clone(),
                action: BoundAction {
                    id: action.id.clone(),
                    name: action.name.clone(),
                },
            });
        }

        state.bindings.insert(trigger.into(), resolved.clone());
        Ok(resolved)
    }

    async fn list_clients(&self) -> Result<Vec<Client>, ManagementError> {
        let mut state = self.state();
        state.enter("list_clients")?;
        Ok(state.clients.clone())
    }

    async fn create_client(&self, spec: &ClientSpec) -> Result<Client, ManagementError> {
        let mut state = self.state();
        state.enter("create_client")?;
        let client = new_client(spec);
        state.clients.push(client.clone());
        Ok(client)
    }

    async fn update_client(&self, id: &str, spec: &ClientSpec) -> Result<Client, ManagementError> {
        let mut state = self.state();
        state.enter("update_client")?;
        let client = state
            .clients
            .iter_mut()
            .find(|c| c.client_id == id)
            .ok_or_else(|| ManagementError::NotFound(format!("client {}", id)))?;
        client.name = spec.name.clone();
        client.callbacks = spec.callbacks.clone();
        client.grant_types = spec.grant_types.clone();
        client.jwt_configuration = Some(spec.jwt_configuration.clone());
        Ok(client.clone())
    }
}
