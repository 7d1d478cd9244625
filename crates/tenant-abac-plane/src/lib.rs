//! Isolation Plane Server
//!
//! The HTTP service and tooling around tenant isolation:
//! - Exchanges identity tokens for tenant-scoped credentials
//! - Enforces the shared resource policy on every object call
//! - Registers the Claim Injector and client application with the identity
//!   provider, idempotently
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check with issuer and signing key info
//! - `POST /v1/credentials/exchange` - Exchange an identity token for a credential
//! - `GET /v1/buckets/{bucket}/objects/{*key}` - Read an object
//! - `PUT /v1/buckets/{bucket}/objects/{*key}` - Write an object
//! - `GET /v1/policy` - The resource policy document
//! - `GET /v1/infrastructure` - The deployment's resource graph
//!
//! Object calls carry the credential in the `x-abac-access-key-id`,
//! `x-abac-secret-access-key` and `x-abac-session-token` headers.

pub mod api;
pub mod core;
pub mod idp;
pub mod keys;
pub mod storage;

pub use api::create_router;
pub use api::handlers::AppState;
pub use core::{AccessEnforcer, AccessError, PresentedCredential};
pub use idp::{
    ActionRegistrar, ClientRegistrar, HttpManagementApi, InMemoryIdentityProvider, ManagementApi,
    RegistrationError,
};
pub use keys::KeyRegistry;
pub use storage::{MemoryObjectStore, ObjectStore};
