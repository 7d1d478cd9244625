//! Federation Trust Anchor
//!
//! Exchanges identity tokens from one OIDC provider for temporary,
//! tenant-scoped credentials.
//!
//! ## Architecture
//!
//! - **Key source**: the provider's published signing keys, found through OIDC
//!   discovery and cached; an unknown `kid` forces one refresh
//! - **Trust anchor**: ordered validation gates (signature, issuer, exact
//!   audience, validity window) followed by session tag propagation from the
//!   trusted claim namespace
//! - **Exchange**: mints a credential bound to the propagated tags, with a
//!   signed session token and a lifetime bounded by the token's own
//!
//! ## Usage
//!
//! ```ignore
//! use tenant_abac_bridge::{CredentialExchange, ExchangeRequest, FederationTrustAnchor, JwksKeySource};
//!
//! let keys = Arc::new(JwksKeySource::new(&config));
//! let anchor = Arc::new(FederationTrustAnchor::new(&config, keys)?);
//! let exchange = CredentialExchange::new(anchor, signer, config.max_session_seconds);
//!
//! let response = exchange.exchange(&ExchangeRequest {
//!     audience: config.client_id.clone(),
//!     subject_token: id_token,
//!     duration_seconds: None,
//!     session_name: None,
//! }).await?;
//! println!("Tags: {:?}", response.session_tags);
//! ```

pub mod anchor;
pub mod error;
pub mod exchange;
pub mod keys;
pub mod types;

pub use anchor::FederationTrustAnchor;
pub use error::{FederationError, Result};
pub use exchange::{secret_digest, CredentialExchange, ExchangeRequest, ExchangeResponse};
pub use keys::{Jwk, JwkSet, JwksKeySource, KeySource, StaticKeySource};
pub use types::ValidatedIdentity;
