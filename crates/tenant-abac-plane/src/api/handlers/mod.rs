//! API request handlers

pub mod documents;
pub mod exchange;
pub mod keys;
pub mod objects;

pub use documents::{get_infrastructure, get_policy};
pub use exchange::exchange_credentials;
pub use keys::list_keys;
pub use objects::{get_object, put_object, ACCESS_KEY_HEADER, SECRET_KEY_HEADER, SESSION_TOKEN_HEADER};

use std::sync::Arc;
use tracing::info;

use tenant_abac_bridge::{CredentialExchange, FederationTrustAnchor, KeySource};
use tenant_abac_core::{
    build_infrastructure_graph, IsolationConfig, IsolationError, PolicyDocument, ResourceGraph,
};

use crate::core::AccessEnforcer;
use crate::keys::KeyRegistry;
use crate::storage::ObjectStore;

/// Application state shared across handlers
pub struct AppState {
    /// Deployment configuration
    pub config: IsolationConfig,
    /// Identity-token validation and credential minting
    pub exchange: CredentialExchange,
    /// Per-call credential verification and policy evaluation
    pub enforcer: AccessEnforcer,
    /// Session-token keys
    pub registry: Arc<KeyRegistry>,
    /// Object storage behind the policy
    pub store: Arc<dyn ObjectStore>,
    /// Resources a deployment of this configuration consists of
    pub graph: ResourceGraph,
}

impl AppState {
    /// Wire every component from one configuration
    ///
    /// Fails if the configuration is invalid or the resulting policy would
    /// not isolate tenants.
    pub fn new(
        config: IsolationConfig,
        keys: Arc<dyn KeySource>,
        registry: Arc<KeyRegistry>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, IsolationError> {
        let anchor = Arc::new(FederationTrustAnchor::new(&config, keys)?);
        let exchange = CredentialExchange::new(anchor, registry.signer(), config.max_session_seconds);
        let policy = Arc::new(PolicyDocument::from_config(&config)?);
        let enforcer = AccessEnforcer::new(policy, registry.clone());
        let graph = build_infrastructure_graph(&config)?;

        info!(
            bucket = %config.bucket_name,
            role = %config.role_arn(),
            signing_kid = %registry.kid(),
            "Application state ready"
        );

        Ok(Self {
            config,
            exchange,
            enforcer,
            registry,
            store,
            graph,
        })
    }
}
