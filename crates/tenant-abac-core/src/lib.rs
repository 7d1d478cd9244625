//! # Tenant ABAC Core
//!
//! Data model and pure logic for attribute-based tenant isolation of shared
//! object storage.
//!
//! ## Pipeline
//!
//! - **Claim Injector**: writes `principal_tags.TenantID = [T]` into every
//!   identity token the provider issues for a tenant's instance
//! - **Federation Trust Anchor** (see `tenant-abac-bridge`): validates the token
//!   and exchanges it for a [`ScopedCredential`] carrying the tag
//! - **Scoped Resource Policy**: one shared document whose resource pattern
//!   `<bucket>/${aws:PrincipalTag/TenantID}/*` resolves against the calling
//!   credential's own tag on every access
//!
//! ## Invariants
//!
//! 1. An absent or malformed tenant id never yields a claim, a credential, or
//!    an allow decision
//! 2. A credential for tenant `A` only ever reaches objects under `A/`
//! 3. Every rejection is final for the same token or credential

pub mod claims;
pub mod config;
pub mod crypto;
pub mod error;
pub mod infra;
pub mod injector;
pub mod policy;
pub mod session;
pub mod tenant;

pub use claims::{
    session_tags_from_claims, session_tags_from_value, TagClaimError, TenantClaim,
    DEFAULT_CLAIMS_NAMESPACE, TENANT_TAG_KEY,
};
pub use config::IsolationConfig;
pub use crypto::{KeyPair, PublicKey, SerializablePublicKey, SignedSession};
pub use error::{ConfigError, IsolationError, Result};
pub use infra::{build_infrastructure_graph, Resource, ResourceGraph, ResourceNode};
pub use injector::{ClaimInjector, ClaimMutation, LoginEvent};
pub use policy::{AccessRequest, Decision, Effect, PolicyDocument, Statement, TENANT_PLACEHOLDER};
pub use session::{ScopedCredential, SessionClaims, SessionPrincipal, SessionTags};
pub use tenant::TenantId;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the library version
pub fn version() -> &'static str {
    VERSION
}
