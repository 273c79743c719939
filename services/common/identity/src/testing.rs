//! Helpers for tests that need real RS256 keys, signed tokens and scripted key sources.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Map, Value};

use crate::error::KeySetError;
use crate::jwks::{KeySource, SigningKey};

pub const TEST_ISSUER: &str = "https://idp.example/pool1";
pub const TEST_AUDIENCE: &str = "client1";

/// An RSA key pair with its JWK components.
pub struct TestKeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    modulus: String,
    exponent: String,
}

impl TestKeyPair {
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("key generation");
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("private pem");
        let public_pem = public_key.to_pkcs1_pem(LineEnding::LF).expect("public pem");

        Self {
            encoding: EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("encoding key"),
            decoding: DecodingKey::from_rsa_pem(public_pem.as_bytes()).expect("decoding key"),
            modulus: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            exponent: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }
    }

    /// Generated once per test binary; RSA generation is slow in debug builds.
    pub fn shared() -> &'static TestKeyPair {
        static KEY: OnceLock<TestKeyPair> = OnceLock::new();
        KEY.get_or_init(TestKeyPair::generate)
    }

    /// A second, unrelated key pair.
    pub fn other() -> &'static TestKeyPair {
        static KEY: OnceLock<TestKeyPair> = OnceLock::new();
        KEY.get_or_init(TestKeyPair::generate)
    }

    pub fn signing_key(&self, kid: &str) -> SigningKey {
        SigningKey::new(kid, Algorithm::RS256, self.decoding.clone())
    }

    pub fn jwk(&self, kid: &str) -> Value {
        json!({
            "kid": kid,
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "n": self.modulus,
            "e": self.exponent,
        })
    }

    pub fn jwks(&self, kids: &[&str]) -> Value {
        json!({ "keys": kids.iter().map(|kid| self.jwk(kid)).collect::<Vec<_>>() })
    }
}

/// Builds signed tokens with Cognito-shaped claims.
#[derive(Clone)]
pub struct TokenBuilder {
    kid: Option<String>,
    claims: Map<String, Value>,
}

impl TokenBuilder {
    /// Issuer `TEST_ISSUER`, audience `TEST_AUDIENCE`, expiring in one hour.
    pub fn new(subject: &str) -> Self {
        let now = Utc::now().timestamp();
        let mut claims = Map::new();
        claims.insert("sub".into(), json!(subject));
        claims.insert("iss".into(), json!(TEST_ISSUER));
        claims.insert("aud".into(), json!(TEST_AUDIENCE));
        claims.insert("iat".into(), json!(now));
        claims.insert("exp".into(), json!(now + 3600));
        Self {
            kid: Some("k1".to_string()),
            claims,
        }
    }

    pub fn kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    pub fn without_kid(mut self) -> Self {
        self.kid = None;
        self
    }

    /// Sets `exp` relative to now; negative values produce an expired token.
    pub fn expires_in(self, seconds: i64) -> Self {
        let exp = Utc::now().timestamp() + seconds;
        self.claim("exp", json!(exp))
    }

    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn sign(&self, key: &TestKeyPair) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.kid.clone();
        encode(&header, &self.claims, &key.encoding).expect("sign token")
    }

    /// Signs with a shared secret, as an attacker replaying an RSA key as HMAC input would.
    pub fn sign_hs256(&self, secret: &[u8]) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = self.kid.clone();
        encode(&header, &self.claims, &EncodingKey::from_secret(secret)).expect("sign token")
    }
}

/// Replaces the payload segment of a signed token, keeping the original signature.
pub fn tamper_payload(token: &str, payload: &Value) -> String {
    let mut parts = token.split('.');
    let header = parts.next().unwrap_or_default();
    let _payload = parts.next();
    let signature = parts.next().unwrap_or_default();
    let forged = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{forged}.{signature}")
}

/// Key source that replays a fixed script of results and counts calls.
///
/// The last scripted result is repeated once the script is exhausted.
#[derive(Clone)]
pub struct ScriptedKeySource {
    script: Arc<Mutex<VecDeque<Result<Vec<SigningKey>, KeySetError>>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl ScriptedKeySource {
    pub fn new(script: Vec<Result<Vec<SigningKey>, KeySetError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySource for ScriptedKeySource {
    async fn fetch(&self) -> Result<Vec<SigningKey>, KeySetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.script.lock().expect("script lock");
        if script.len() > 1 {
            script.pop_front().expect("non-empty script")
        } else {
            script.front().cloned().unwrap_or(Err(KeySetError::Empty))
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
