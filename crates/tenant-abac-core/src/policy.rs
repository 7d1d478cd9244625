//! Scoped resource policy
//!
//! One static document shared by every tenant. Resource patterns reference the
//! caller's session tag through `${aws:PrincipalTag/<key>}`; the placeholder is
//! resolved against the calling credential's own tags on each evaluation and
//! never against anything in the request.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::claims::TENANT_TAG_KEY;
use crate::config::{is_valid_bucket_name, IsolationConfig};
use crate::error::{IsolationError, Result};
use crate::session::SessionTags;
use crate::tenant::is_path_safe;

/// Policy language version
pub const POLICY_VERSION: &str = "2012-10-17";

/// Resource identifier prefix for storage objects
pub const OBJECT_RESOURCE_PREFIX: &str = "arn:aws:s3:::";

/// Placeholder resolved to the caller's `TenantID` session tag
pub const TENANT_PLACEHOLDER: &str = "${aws:PrincipalTag/TenantID}";

const PRINCIPAL_TAG_VARIABLE: &str = "aws:PrincipalTag/";

/// Statement effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// A single policy statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: Effect,
    pub action: Vec<String>,
    pub resource: Vec<String>,
}

/// A resource policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

/// A storage call to authorize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Action, e.g. `s3:GetObject`
    pub action: String,
    /// Full resource identifier
    pub resource: String,
}

impl AccessRequest {
    /// An object-level call on `bucket/key`
    ///
    /// The bucket must be a valid bucket name, so the first segment after it
    /// is always the first segment of `key`.
    pub fn object(action: impl Into<String>, bucket: &str, key: &str) -> Result<Self> {
        if !is_valid_bucket_name(bucket) {
            return Err(IsolationError::InvalidResource(format!(
                "invalid bucket name '{}'",
                bucket.escape_debug()
            )));
        }
        Ok(Self {
            action: action.into(),
            resource: format!("{}{}/{}", OBJECT_RESOURCE_PREFIX, bucket, key),
        })
    }
}

/// Outcome of evaluating a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// An Allow statement matched and no Deny did
    Allow,
    /// A Deny statement matched
    ExplicitDeny { sid: Option<String> },
    /// Nothing matched
    ImplicitDeny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

impl PolicyDocument {
    /// The tenant-scoped policy for a bucket: `actions` on `<bucket>/${TenantID}/*`
    ///
    /// Fails if the resulting document would not isolate tenants.
    pub fn tenant_scoped(bucket: &str, actions: &[String]) -> Result<Self> {
        if actions.is_empty() {
            return Err(IsolationError::PolicyLint("no actions granted".into()));
        }
        let document = Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement {
                sid: Some("TenantScopedObjectAccess".to_string()),
                effect: Effect::Allow,
                action: actions.to_vec(),
                resource: vec![format!(
                    "{}{}/{}/*",
                    OBJECT_RESOURCE_PREFIX, bucket, TENANT_PLACEHOLDER
                )],
            }],
        };
        document.lint_tenant_scoped(bucket)?;
        Ok(document)
    }

    /// The policy a deployment attaches to its federated role
    pub fn from_config(config: &IsolationConfig) -> Result<Self> {
        Self::tenant_scoped(&config.bucket_name, &config.allowed_actions)
    }

    /// Reject any Allow that is not confined to the caller's tenant prefix
    ///
    /// Catches unscoped wildcards, literal tenant values, other buckets and
    /// bucket-level grants.
    pub fn lint_tenant_scoped(&self, bucket: &str) -> Result<()> {
        let required = format!("{}{}/{}/", OBJECT_RESOURCE_PREFIX, bucket, TENANT_PLACEHOLDER);

        for statement in self.statement.iter().filter(|s| s.effect == Effect::Allow) {
            if statement.resource.is_empty() {
                return Err(IsolationError::PolicyLint("Allow without a resource".into()));
            }
            for resource in &statement.resource {
                if !resource.starts_with(&required) {
                    return Err(IsolationError::PolicyLint(format!(
                        "resource '{}' is not scoped to '{}'",
                        resource, required
                    )));
                }
            }
            for action in &statement.action {
                if action == "*" || !action.starts_with("s3:") {
                    return Err(IsolationError::PolicyLint(format!(
                        "action '{}' is not an object action",
                        action
                    )));
                }
            }
        }
        Ok(())
    }

    /// Evaluate a request against the caller's session tags
    ///
    /// Deny statements win over Allow; the default is deny.
    pub fn evaluate(&self, request: &AccessRequest, tags: &SessionTags) -> Decision {
        let matching = |s: &&Statement| {
            s.action.iter().any(|a| action_matches(a, &request.action))
                && s.resource.iter().any(|r| resource_matches(r, &request.resource, tags))
        };

        if let Some(deny) = self
            .statement
            .iter()
            .filter(|s| s.effect == Effect::Deny)
            .find(matching)
        {
            return Decision::ExplicitDeny {
                sid: deny.sid.clone(),
            };
        }

        if self
            .statement
            .iter()
            .filter(|s| s.effect == Effect::Allow)
            .any(|s| matching(&s))
        {
            Decision::Allow
        } else {
            Decision::ImplicitDeny
        }
    }

    /// Evaluate and turn any deny into `PolicyEvaluationDenied`
    pub fn authorize(&self, request: &AccessRequest, tags: &SessionTags) -> Result<()> {
        let tenant = tags.get(TENANT_TAG_KEY).unwrap_or("<none>");
        let reason = match self.evaluate(request, tags) {
            Decision::Allow => {
                debug!(tenant_id = %tenant, action = %request.action, resource = %request.resource, "Access allowed");
                return Ok(());
            }
            Decision::ExplicitDeny { sid } => format!(
                "explicit deny by statement {}",
                sid.as_deref().unwrap_or("<unnamed>")
            ),
            Decision::ImplicitDeny => "no statement allows this request".to_string(),
        };
        warn!(tenant_id = %tenant, action = %request.action, resource = %request.resource, %reason, "Access denied");
        Err(IsolationError::PolicyEvaluationDenied {
            action: request.action.clone(),
            resource: request.resource.clone(),
            reason,
        })
    }

    /// Render as pretty JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(IsolationError::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Char(char),
    AnyRun,
    AnyOne,
}

/// Expand a resource pattern against the caller's tags
///
/// Returns `None` if a referenced tag is missing or unsafe, which makes the
/// pattern match nothing.
fn expand_resource(pattern: &str, tags: &SessionTags) -> Option<Vec<Token>> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(c) = rest.chars().next() {
        if let Some(after) = rest.strip_prefix("${") {
            let end = after.find('}')?;
            let variable = &after[..end];
            match variable {
                "*" => tokens.push(Token::Char('*')),
                "?" => tokens.push(Token::Char('?')),
                "$" => tokens.push(Token::Char('$')),
                _ => {
                    let key = variable.strip_prefix(PRINCIPAL_TAG_VARIABLE)?;
                    let value = tags.get(key)?;
                    if !is_path_safe(value) {
                        return None;
                    }
                    tokens.extend(value.chars().map(Token::Char));
                }
            }
            rest = &after[end + 1..];
            continue;
        }
        tokens.push(match c {
            '*' => Token::AnyRun,
            '?' => Token::AnyOne,
            other => Token::Char(other),
        });
        rest = &rest[c.len_utf8()..];
    }
    Some(tokens)
}

fn literal_pattern(pattern: &str) -> Vec<Token> {
    pattern
        .chars()
        .map(|c| match c {
            '*' => Token::AnyRun,
            '?' => Token::AnyOne,
            other => Token::Char(other),
        })
        .collect()
}

fn resource_matches(pattern: &str, resource: &str, tags: &SessionTags) -> bool {
    match expand_resource(pattern, tags) {
        Some(tokens) => glob_match(&tokens, resource, false),
        None => false,
    }
}

fn action_matches(pattern: &str, action: &str) -> bool {
    glob_match(&literal_pattern(pattern), action, true)
}

/// Wildcard match with single-star backtracking
fn glob_match(pattern: &[Token], text: &str, ignore_case: bool) -> bool {
    let text: Vec<char> = text.chars().collect();
    let eq = |a: char, b: char| {
        if ignore_case {
            a.eq_ignore_ascii_case(&b)
        } else {
            a == b
        }
    };

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(Token::AnyOne) => {
                p += 1;
                t += 1;
            }
            Some(Token::Char(c)) if eq(*c, text[t]) => {
                p += 1;
                t += 1;
            }
            Some(Token::AnyRun) => {
                star = Some((p, t));
                p += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|tok| *tok == Token::AnyRun)
}
