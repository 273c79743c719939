use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::KeySetError;

/// One public signing key published by the identity provider.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    algorithm: Algorithm,
    key: DecodingKey,
}

impl SigningKey {
    pub fn new(kid: impl Into<String>, algorithm: Algorithm, key: DecodingKey) -> Self {
        Self {
            kid: kid.into(),
            algorithm,
            key,
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Anything that can produce the provider's current key set.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<SigningKey>, KeySetError>;

    /// Human readable origin, used in logs.
    fn describe(&self) -> String;
}

/// Fetches a JWKS document over HTTP.
#[derive(Clone)]
pub struct JwksFetcher {
    client: Client,
    url: String,
}

impl JwksFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    /// Builds a client whose requests are abandoned after `timeout`.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, KeySetError> {
        let url = url.into();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| KeySetError::Transport {
                url: url.clone(),
                reason: err.to_string(),
            })?;
        Ok(Self { client, url })
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeySource for JwksFetcher {
    async fn fetch(&self) -> Result<Vec<SigningKey>, KeySetError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| KeySetError::Transport {
                url: self.url.clone(),
                reason: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(KeySetError::Status {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }

        let body: JwksDocument = response
            .json()
            .await
            .map_err(|err| KeySetError::Decode(err.to_string()))?;

        let keys = signing_keys(body);
        debug!(url = %self.url, key_count = keys.len(), "fetched JWKS");
        Ok(keys)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Parses a raw JWKS JSON document.
pub fn parse_jwks(document: &str) -> Result<Vec<SigningKey>, KeySetError> {
    let body: JwksDocument =
        serde_json::from_str(document).map_err(|err| KeySetError::Decode(err.to_string()))?;
    Ok(signing_keys(body))
}

fn signing_keys(document: JwksDocument) -> Vec<SigningKey> {
    let mut keys = Vec::with_capacity(document.keys.len());
    for entry in document.keys {
        match entry.into_signing_key() {
            Ok(Some(key)) => keys.push(key),
            Ok(None) => {}
            Err(reason) => warn!(%reason, "skipping unusable JWKS entry"),
        }
    }
    keys
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<JwkEntry>,
}

#[derive(Debug, Deserialize)]
struct JwkEntry {
    kid: Option<String>,
    kty: Option<String>,
    alg: Option<String>,
    #[serde(rename = "use")]
    key_use: Option<String>,
    n: Option<String>,
    e: Option<String>,
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

impl JwkEntry {
    /// `Ok(None)` for entries that are valid but not meant for signature checks.
    fn into_signing_key(self) -> Result<Option<SigningKey>, String> {
        if self.key_use.as_deref() == Some("enc") {
            return Ok(None);
        }

        let kid = self.kid.ok_or_else(|| "entry missing kid".to_string())?;
        let kty = self.kty.unwrap_or_else(|| "RSA".to_string());

        match kty.as_str() {
            "RSA" => {
                let algorithm = match self.alg.as_deref() {
                    None => Algorithm::RS256,
                    Some(alg) => parse_algorithm(&kid, alg)?,
                };
                if !matches!(
                    algorithm,
                    Algorithm::RS256
                        | Algorithm::RS384
                        | Algorithm::RS512
                        | Algorithm::PS256
                        | Algorithm::PS384
                        | Algorithm::PS512
                ) {
                    return Err(format!("key '{kid}' pairs kty RSA with alg {algorithm:?}"));
                }
                let (Some(n), Some(e)) = (self.n, self.e) else {
                    return Err(format!("key '{kid}' missing RSA components"));
                };
                let key = DecodingKey::from_rsa_components(&n, &e)
                    .map_err(|err| format!("key '{kid}' has invalid RSA components: {err}"))?;
                Ok(Some(SigningKey::new(kid, algorithm, key)))
            }
            "EC" => {
                let implied = match self.crv.as_deref() {
                    Some("P-256") => Algorithm::ES256,
                    Some("P-384") => Algorithm::ES384,
                    other => {
                        return Err(format!("key '{kid}' uses unsupported curve {other:?}"));
                    }
                };
                if let Some(alg) = self.alg.as_deref() {
                    let declared = parse_algorithm(&kid, alg)?;
                    if declared != implied {
                        return Err(format!("key '{kid}' declares {alg} for a {implied:?} curve"));
                    }
                }
                let (Some(x), Some(y)) = (self.x, self.y) else {
                    return Err(format!("key '{kid}' missing EC coordinates"));
                };
                let key = DecodingKey::from_ec_components(&x, &y)
                    .map_err(|err| format!("key '{kid}' has invalid EC coordinates: {err}"))?;
                Ok(Some(SigningKey::new(kid, implied, key)))
            }
            other => Err(format!("key '{kid}' uses unsupported kty '{other}'")),
        }
    }
}

fn parse_algorithm(kid: &str, alg: &str) -> Result<Algorithm, String> {
    Algorithm::from_str(alg).map_err(|_| format!("key '{kid}' uses unknown alg '{alg}'"))
}
