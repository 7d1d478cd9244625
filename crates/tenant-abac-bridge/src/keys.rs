//! Identity provider signing keys
//!
//! Keys are located through OIDC discovery and cached. A token whose `kid` is
//! not in the cached set forces one refresh, so provider key rotation is
//! picked up without waiting for the cache to expire.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use tenant_abac_core::IsolationConfig;

use crate::error::{FederationError, Result};

/// JWKS (JSON Web Key Set) document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// Individual JWK (JSON Web Key)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Key type
    pub kty: String,
    /// Algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Use (sig for signing)
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// RSA modulus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// EC curve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl JwkSet {
    /// Parse a JWKS document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(FederationError::from)
    }

    fn signing_keys(&self) -> impl Iterator<Item = &Jwk> {
        self.keys
            .iter()
            .filter(|k| k.key_use.as_deref().map_or(true, |u| u == "sig"))
    }

    /// Find the signing key for a token
    ///
    /// Without a `kid` the set must contain exactly one signing key.
    pub fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.signing_keys().find(|k| k.kid.as_deref() == Some(kid)),
            None => {
                let mut keys = self.signing_keys();
                match (keys.next(), keys.next()) {
                    (Some(only), None) => Some(only),
                    _ => None,
                }
            }
        }
    }
}

impl Jwk {
    /// Build a decoding key for `alg`, refusing keys of another family
    pub fn decoding_key(&self, alg: Algorithm) -> Result<DecodingKey> {
        if let Some(declared) = self.alg.as_deref() {
            if declared != format!("{:?}", alg) {
                return Err(FederationError::InvalidSignature(format!(
                    "key is for {}, token uses {:?}",
                    declared, alg
                )));
            }
        }

        match (self.kty.as_str(), alg) {
            (
                "RSA",
                Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512,
            ) => {
                let n = self
                    .n
                    .as_ref()
                    .ok_or_else(|| FederationError::InvalidFormat("Missing RSA modulus".into()))?;
                let e = self
                    .e
                    .as_ref()
                    .ok_or_else(|| FederationError::InvalidFormat("Missing RSA exponent".into()))?;
                DecodingKey::from_rsa_components(n, e).map_err(FederationError::from)
            }
            ("EC", Algorithm::ES256 | Algorithm::ES384) => {
                let x = self.x.as_ref().ok_or_else(|| {
                    FederationError::InvalidFormat("Missing EC x coordinate".into())
                })?;
                let y = self.y.as_ref().ok_or_else(|| {
                    FederationError::InvalidFormat("Missing EC y coordinate".into())
                })?;
                DecodingKey::from_ec_components(x, y).map_err(FederationError::from)
            }
            (kty, alg) => Err(FederationError::UnsupportedAlgorithm(format!(
                "{:?} with key type {}",
                alg, kty
            ))),
        }
    }
}

/// Where the trust anchor gets the provider's published keys
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Current key set; `refresh` bypasses any cache
    async fn key_set(&self, refresh: bool) -> Result<Arc<JwkSet>>;

    /// Get a description of this source (for logging)
    fn description(&self) -> &str {
        "key source"
    }
}

/// A fixed key set, e.g. pinned keys or tests
#[derive(Debug, Clone)]
pub struct StaticKeySource {
    keys: Arc<JwkSet>,
}

impl StaticKeySource {
    pub fn new(keys: JwkSet) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }

    /// Parse a JWKS document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(JwkSet::from_json(json)?))
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn key_set(&self, _refresh: bool) -> Result<Arc<JwkSet>> {
        Ok(self.keys.clone())
    }

    fn description(&self) -> &str {
        "static key set"
    }
}

/// OIDC discovery document fields we use
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    jwks_uri: String,
}

/// Keys fetched through OIDC discovery, cached with moka
pub struct JwksKeySource {
    issuer: String,
    discovery_url: String,
    cache: Cache<String, Arc<JwkSet>>,
    http_client: reqwest::Client,
}

impl JwksKeySource {
    /// Create a source for the configured provider
    pub fn new(config: &IsolationConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    /// Create a source with a caller-supplied HTTP client
    pub fn with_client(config: &IsolationConfig, http_client: reqwest::Client) -> Self {
        Self {
            issuer: config.issuer(),
            discovery_url: config.discovery_url(),
            cache: Cache::builder()
                .time_to_live(config.jwks_cache_ttl().max(Duration::from_secs(1)))
                .max_capacity(4)
                .build(),
            http_client,
        }
    }

    async fn fetch(&self) -> Result<Arc<JwkSet>> {
        debug!(url = %self.discovery_url, "Fetching OIDC discovery document");
        let discovery: DiscoveryDocument = self
            .http_client
            .get(&self.discovery_url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| FederationError::JwksFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| FederationError::JwksFetch(e.to_string()))?;

        if discovery.issuer != self.issuer {
            return Err(FederationError::UnknownIssuer(format!(
                "discovery document names '{}', expected '{}'",
                discovery.issuer, self.issuer
            )));
        }

        debug!(url = %discovery.jwks_uri, "Fetching JWKS");
        let jwks: JwkSet = self
            .http_client
            .get(&discovery.jwks_uri)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| FederationError::JwksFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| FederationError::JwksFetch(e.to_string()))?;

        info!(issuer = %self.issuer, keys = jwks.keys.len(), "Loaded provider signing keys");
        Ok(Arc::new(jwks))
    }
}

#[async_trait]
impl KeySource for JwksKeySource {
    async fn key_set(&self, refresh: bool) -> Result<Arc<JwkSet>> {
        if refresh {
            self.cache.invalidate(&self.issuer).await;
        }

        // Concurrent misses share one fetch
        self.cache
            .try_get_with(self.issuer.clone(), self.fetch())
            .await
            .map_err(|e| match e.as_ref() {
                FederationError::UnknownIssuer(detail) => FederationError::UnknownIssuer(detail.clone()),
                FederationError::Http(detail) => FederationError::Http(detail.clone()),
                FederationError::JwksFetch(detail) => FederationError::JwksFetch(detail.clone()),
                other => FederationError::JwksFetch(other.to_string()),
            })
    }

    fn description(&self) -> &str {
        "OIDC discovery"
    }
}
