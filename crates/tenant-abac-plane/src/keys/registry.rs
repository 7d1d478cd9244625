//! Key Registry for the isolation plane
//!
//! Manages the Ed25519 keys behind session tokens:
//! - This plane's signing key, used when credentials are minted
//! - Trusted verification keys (kid -> key), including our own, so tokens
//!   minted before a key rotation keep verifying until they expire
//!
//! Public keys are published at `GET /v1/keys`; a restarted or rotated plane
//! takes its predecessor's keys through `TENANT_ABAC_TRUSTED_KEYS`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use tenant_abac_core::{
    IsolationError, KeyPair, PublicKey, SerializablePublicKey, SessionClaims, SignedSession,
};

/// Key Registry for the isolation plane
pub struct KeyRegistry {
    /// Trusted session-token verification keys (kid -> key)
    trusted: RwLock<HashMap<String, PublicKey>>,

    /// This plane's session-token signing key
    signer: KeyPair,
}

impl KeyRegistry {
    /// Create a registry around a signing key
    ///
    /// The signing key's public half is trusted immediately.
    pub fn new(signer: KeyPair) -> Self {
        let mut trusted = HashMap::new();
        trusted.insert(signer.kid().to_string(), signer.public_key());

        info!(kid = %signer.kid(), "Key registry initialized with session signing key");

        Self {
            trusted: RwLock::new(trusted),
            signer,
        }
    }

    /// Create a registry with a freshly generated signing key
    pub fn generate(kid: impl Into<String>) -> Self {
        Self::new(KeyPair::generate(kid))
    }

    /// Signing key id
    pub fn kid(&self) -> &str {
        self.signer.kid()
    }

    /// The signing key, for the credential exchange
    pub fn signer(&self) -> KeyPair {
        self.signer.clone()
    }

    /// Trust an additional verification key
    pub fn trust(&self, key: PublicKey) {
        let kid = key.kid().to_string();
        self.trusted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kid.clone(), key);
        info!(kid = %kid, "Trusted session verification key");
    }

    /// Trust published keys, e.g. a predecessor's after rotation
    ///
    /// All keys are decoded before any is trusted. A key claiming the signing
    /// kid is refused, since it could shadow our own.
    pub fn trust_published(&self, keys: Vec<SerializablePublicKey>) -> Result<usize, IsolationError> {
        let decoded = keys
            .into_iter()
            .map(PublicKey::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(clash) = decoded.iter().find(|k| k.kid() == self.signer.kid()) {
            return Err(IsolationError::Crypto(format!(
                "trusted key '{}' reuses the signing key id",
                clash.kid()
            )));
        }
        let count = decoded.len();
        for key in decoded {
            self.trust(key);
        }
        Ok(count)
    }

    /// Every trusted verification key, ordered by kid
    pub fn published(&self) -> Vec<SerializablePublicKey> {
        let trusted = self.trusted.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<SerializablePublicKey> =
            trusted.values().map(SerializablePublicKey::from).collect();
        keys.sort_by(|a, b| a.kid.cmp(&b.kid));
        keys
    }

    /// Number of trusted verification keys
    pub fn trusted_count(&self) -> usize {
        self.trusted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Verify a wire session token and return its claims
    ///
    /// Checks the signature only; expiry and credential binding are the
    /// caller's job.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, IsolationError> {
        let signed = SignedSession::from_token(token)?;
        let kid = signed
            .kid()
            .ok_or_else(|| IsolationError::Crypto("session token has no key id".into()))?;

        let key = self
            .trusted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kid)
            .cloned()
            .ok_or_else(|| IsolationError::Crypto(format!("unknown session key '{}'", kid)))?;

        debug!(kid = %kid, "Verifying session token");
        key.verify_session(&signed)
    }
}
