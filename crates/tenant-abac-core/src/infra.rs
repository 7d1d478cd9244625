//! Infrastructure graph
//!
//! A declarative description of the cloud resources one deployment needs:
//! the shared bucket, the OIDC provider, and the federated role carrying the
//! tenant-scoped policy. Building it is pure; nothing here talks to a cloud.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::config::IsolationConfig;
use crate::error::{ConfigError, IsolationError, Result};
use crate::policy::{Effect, PolicyDocument, POLICY_VERSION};

/// Logical id of the bucket node
pub const BUCKET_ID: &str = "S3Bucket";
/// Logical id of the OIDC provider node
pub const OIDC_PROVIDER_ID: &str = "IAMOIDCProvider";
/// Logical id of the role node
pub const ROLE_ID: &str = "IAMRole";

/// Output carrying the bucket name
pub const BUCKET_NAME_OUTPUT: &str = "S3BucketName";
/// Output carrying the role identifier
pub const ROLE_ARN_OUTPUT: &str = "IAMRoleARN";

/// Actions the OIDC principal may call on the role
pub const TRUST_ACTIONS: [&str; 2] = ["sts:AssumeRoleWithWebIdentity", "sts:TagSession"];

/// What happens to a resource when the graph is torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    Destroy,
    Retain,
}

/// Trust policy statement admitting federated tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrustStatement {
    pub effect: Effect,
    pub principal: BTreeMap<String, String>,
    pub action: Vec<String>,
    pub condition: BTreeMap<String, BTreeMap<String, String>>,
}

/// Role trust policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrustPolicy {
    pub version: String,
    pub statement: Vec<TrustStatement>,
}

/// A resource in the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resource {
    Bucket {
        name: String,
        enforce_ssl: bool,
        removal_policy: RemovalPolicy,
        auto_delete_objects: bool,
    },
    OidcProvider {
        arn: String,
        url: String,
        client_ids: Vec<String>,
    },
    Role {
        name: String,
        arn: String,
        trust_policy: TrustPolicy,
        inline_policies: BTreeMap<String, PolicyDocument>,
    },
}

/// A resource plus the logical ids it depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub logical_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    pub resource: Resource,
}

/// Resources in dependency order plus exported outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGraph {
    pub resources: Vec<ResourceNode>,
    pub outputs: BTreeMap<String, String>,
}

impl ResourceGraph {
    /// Look up a node by logical id
    pub fn get(&self, logical_id: &str) -> Option<&ResourceNode> {
        self.resources.iter().find(|n| n.logical_id == logical_id)
    }

    /// Look up an output value
    pub fn output(&self, name: &str) -> Option<&str> {
        self.outputs.get(name).map(String::as_str)
    }

    /// Check ids are unique and every dependency precedes its dependent
    pub fn check_order(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.resources {
            for dep in &node.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(IsolationError::Configuration(
                        ConfigError::Invalid {
                            key: node.logical_id.clone(),
                            reason: format!("depends on '{}' which is not declared before it", dep),
                        },
                    ));
                }
            }
            if !seen.insert(node.logical_id.as_str()) {
                return Err(IsolationError::Configuration(
                    ConfigError::Invalid {
                        key: node.logical_id.clone(),
                        reason: "duplicate logical id".into(),
                    },
                ));
            }
        }
        Ok(())
    }

    /// Render as pretty JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(IsolationError::from)
    }
}

/// Build the resource graph for a deployment
///
/// Deterministic: the same configuration always yields the same graph.
pub fn build_infrastructure_graph(config: &IsolationConfig) -> Result<ResourceGraph> {
    config.validate()?;
    let policy = PolicyDocument::from_config(config)?;

    let bucket = ResourceNode {
        logical_id: BUCKET_ID.to_string(),
        depends_on: Vec::new(),
        resource: Resource::Bucket {
            name: config.bucket_name.clone(),
            enforce_ssl: true,
            removal_policy: RemovalPolicy::Destroy,
            auto_delete_objects: true,
        },
    };

    let provider = ResourceNode {
        logical_id: OIDC_PROVIDER_ID.to_string(),
        depends_on: Vec::new(),
        resource: Resource::OidcProvider {
            arn: config.provider_arn(),
            url: config.issuer(),
            client_ids: vec![config.client_id.clone()],
        },
    };

    let principal = config.session_principal();
    let trust_policy = TrustPolicy {
        version: POLICY_VERSION.to_string(),
        statement: vec![TrustStatement {
            effect: Effect::Allow,
            principal: BTreeMap::from([("Federated".to_string(), config.provider_arn())]),
            action: TRUST_ACTIONS.iter().map(|a| a.to_string()).collect(),
            condition: BTreeMap::from([(
                "StringEquals".to_string(),
                BTreeMap::from([(principal.audience_condition_key, principal.audience)]),
            )]),
        }],
    };

    let role = ResourceNode {
        logical_id: ROLE_ID.to_string(),
        depends_on: vec![OIDC_PROVIDER_ID.to_string(), BUCKET_ID.to_string()],
        resource: Resource::Role {
            name: config.role_name.clone(),
            arn: principal.role_arn.clone(),
            trust_policy,
            inline_policies: BTreeMap::from([(config.bucket_name.clone(), policy)]),
        },
    };

    let graph = ResourceGraph {
        resources: vec![bucket, provider, role],
        outputs: BTreeMap::from([
            (BUCKET_NAME_OUTPUT.to_string(), config.bucket_name.clone()),
            (ROLE_ARN_OUTPUT.to_string(), principal.role_arn),
        ]),
    };
    graph.check_order()?;
    Ok(graph)
}
