//! Session token signing
//!
//! Session tokens are COSE_Sign1 envelopes (Ed25519) over `SessionClaims`,
//! carried on the wire as unpadded base64url. Any party holding the issuer's
//! public key can authorize a storage call from the token alone.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use coset::{iana, CborSerializable, CoseSign1, CoseSign1Builder, HeaderBuilder};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{IsolationError, Result};
use crate::session::SessionClaims;

/// COSE algorithm identifier for EdDSA (Ed25519)
const EDDSA_ALG: iana::Algorithm = iana::Algorithm::EdDSA;

/// A signed session token
#[derive(Debug, Clone)]
pub struct SignedSession {
    cose: CoseSign1,
}

impl SignedSession {
    /// Get the key ID from the protected header
    pub fn kid(&self) -> Option<String> {
        let kid = &self.cose.protected.header.key_id;
        if kid.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(kid).to_string())
        }
    }

    /// Get the signature bytes
    pub fn signature(&self) -> &[u8] {
        &self.cose.signature
    }

    /// Serialize to CBOR bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.cose.clone().to_vec().map_err(IsolationError::from)
    }

    /// Deserialize from CBOR bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let cose = CoseSign1::from_slice(bytes).map_err(IsolationError::from)?;
        Ok(Self { cose })
    }

    /// Encode as a wire token
    pub fn to_token(&self) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(self.to_bytes()?))
    }

    /// Decode a wire token (does not verify)
    pub fn from_token(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| IsolationError::Serialization(format!("session token: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Deserialize the claims from the payload
    ///
    /// Note: This does NOT verify the signature. Use `PublicKey::verify_session` for that.
    fn extract_claims(&self) -> Result<SessionClaims> {
        let payload = self
            .cose
            .payload
            .as_ref()
            .ok_or(IsolationError::MissingField("payload".into()))?;
        SessionClaims::from_bytes(payload)
    }
}

/// Ed25519 key pair for signing session tokens
#[derive(Clone)]
pub struct KeyPair {
    kid: String,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("kid", &self.kid)
            .field("verifying_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate(kid: impl Into<String>) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(kid, signing_key)
    }

    /// Create a key pair from an existing signing key
    pub fn from_signing_key(kid: impl Into<String>, signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            kid: kid.into(),
            signing_key,
            verifying_key,
        }
    }

    /// Create a key pair from raw seed bytes
    pub fn from_bytes(kid: impl Into<String>, bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(kid, SigningKey::from_bytes(bytes))
    }

    /// Get the key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            kid: self.kid.clone(),
            verifying_key: self.verifying_key,
        }
    }

    /// Sign session claims
    pub fn sign_session(&self, claims: &SessionClaims) -> Result<SignedSession> {
        let payload = claims.to_bytes()?;

        let protected = HeaderBuilder::new()
            .algorithm(EDDSA_ALG)
            .key_id(self.kid.as_bytes().to_vec())
            .build();

        let cose = CoseSign1Builder::new()
            .protected(protected)
            .payload(payload)
            .try_create_signature(&[], |data| {
                let signature = self.signing_key.sign(data);
                Ok::<_, IsolationError>(signature.to_bytes().to_vec())
            })?
            .build();

        Ok(SignedSession { cose })
    }
}

/// Ed25519 public key for verification
#[derive(Clone)]
pub struct PublicKey {
    kid: String,
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey").field("kid", &self.kid).finish()
    }
}

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(kid: impl Into<String>, bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)?;
        Ok(Self {
            kid: kid.into(),
            verifying_key,
        })
    }

    /// Get the key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Get the raw verifying key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Verify a signed session and extract its claims
    pub fn verify_session(&self, signed: &SignedSession) -> Result<SessionClaims> {
        let kid = &signed.cose.protected.header.key_id;
        if !kid.is_empty() {
            let kid_str = String::from_utf8_lossy(kid);
            if kid_str != self.kid {
                return Err(IsolationError::Crypto(format!(
                    "Key ID mismatch: expected '{}', got '{}'",
                    self.kid, kid_str
                )));
            }
        }

        let expected_alg = Some(coset::RegisteredLabelWithPrivate::Assigned(EDDSA_ALG));
        if signed.cose.protected.header.alg != expected_alg {
            return Err(IsolationError::Crypto("Unexpected COSE algorithm".into()));
        }

        let sig_structure = signed.cose.tbs_data(&[]);

        let signature_bytes: [u8; 64] = signed
            .cose
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| IsolationError::Crypto("Invalid signature length".into()))?;
        let signature = Signature::from_bytes(&signature_bytes);

        self.verifying_key
            .verify(&sig_structure, &signature)
            .map_err(|e| IsolationError::Crypto(e.to_string()))?;

        signed.extract_claims()
    }
}

/// Serializable public key for publication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializablePublicKey {
    /// Key identifier
    pub kid: String,
    /// Base64-encoded public key bytes
    pub key: String,
}

impl From<&PublicKey> for SerializablePublicKey {
    fn from(pk: &PublicKey) -> Self {
        use base64::engine::general_purpose::STANDARD;
        Self {
            kid: pk.kid.clone(),
            key: STANDARD.encode(pk.to_bytes()),
        }
    }
}

impl TryFrom<SerializablePublicKey> for PublicKey {
    type Error = IsolationError;

    fn try_from(spk: SerializablePublicKey) -> Result<Self> {
        use base64::engine::general_purpose::STANDARD;
        let bytes = STANDARD
            .decode(&spk.key)
            .map_err(|e| IsolationError::Crypto(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IsolationError::Crypto("Invalid key length".into()))?;
        PublicKey::from_bytes(spk.kid, &bytes)
    }
}
