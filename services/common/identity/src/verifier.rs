use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{decode, decode_header, Validation};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::KeySetCache;
use crate::claims::{ClaimsRepr, VerifiedClaims};
use crate::config::IdentityConfig;
use crate::error::{KeySetError, VerificationFailure, VerifyResult};
use crate::jwks::{JwksFetcher, KeySource, SigningKey};
use crate::metrics::IdentityMetrics;

/// Verifies bearer tokens against the provider's published signing keys.
pub struct TokenVerifier {
    config: IdentityConfig,
    keys: KeySetCache,
    metrics: Option<IdentityMetrics>,
}

impl TokenVerifier {
    pub fn new(config: IdentityConfig, keys: KeySetCache) -> Self {
        Self {
            config,
            keys,
            metrics: None,
        }
    }

    pub fn builder(config: IdentityConfig) -> TokenVerifierBuilder {
        TokenVerifierBuilder::new(config)
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeySetCache {
        &self.keys
    }

    /// Verifies against the issuer and audience from the configuration.
    pub async fn verify(&self, token: &str) -> VerifyResult<VerifiedClaims> {
        self.verify_with(token, &self.config.issuer, &self.config.audience)
            .await
    }

    pub async fn verify_with(
        &self,
        token: &str,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> VerifyResult<VerifiedClaims> {
        let now = Utc::now().timestamp();
        let outcome = self
            .check(token, expected_issuer, expected_audience, now)
            .await;

        match &outcome {
            Ok(claims) => {
                debug!(sub = %claims.subject, "verified bearer token");
                self.record("verified");
            }
            Err(failure) => {
                debug!(reason = failure.kind(), error = %failure, "bearer token rejected");
                self.record(failure.kind());
            }
        }
        outcome
    }

    async fn check(
        &self,
        token: &str,
        expected_issuer: &str,
        expected_audience: &str,
        now: i64,
    ) -> VerifyResult<VerifiedClaims> {
        if token.split('.').count() != 3 {
            return Err(VerificationFailure::MalformedToken(
                "expected three dot-separated segments".into(),
            ));
        }
        let header = decode_header(token).map_err(|err| {
            VerificationFailure::MalformedToken(format!("unreadable header: {err}"))
        })?;
        let kid = header.kid.ok_or(VerificationFailure::MissingKeyId)?;
        let key = self.keys.resolve(&kid).await?;

        // The key decides the algorithm; a header naming another one is forged or broken.
        if header.alg != key.algorithm() {
            warn!(
                kid = %kid,
                header_alg = ?header.alg,
                key_alg = ?key.algorithm(),
                "token algorithm does not match signing key"
            );
            return Err(VerificationFailure::BadSignature);
        }

        let mut validation = Validation::new(key.algorithm());
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        let token_data = decode::<Value>(token, key.decoding_key(), &validation)?;
        let repr = ClaimsRepr::parse(&token_data.claims)?;

        let leeway = i64::from(self.config.leeway_seconds);
        if now >= repr.expires_at_epoch().saturating_add(leeway) {
            return Err(VerificationFailure::TokenExpired);
        }
        if repr.issuer() != expected_issuer {
            return Err(VerificationFailure::IssuerMismatch(repr.issuer().to_string()));
        }
        if !repr.audience_contains(expected_audience) {
            return Err(VerificationFailure::AudienceMismatch);
        }

        repr.into_verified(token_data.claims)
    }

    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.verification(outcome);
        }
    }
}

pub struct TokenVerifierBuilder {
    config: IdentityConfig,
    source: Option<Arc<dyn KeySource>>,
    static_keys: Vec<SigningKey>,
    metrics: Option<IdentityMetrics>,
}

impl TokenVerifierBuilder {
    fn new(config: IdentityConfig) -> Self {
        Self {
            config,
            source: None,
            static_keys: Vec::new(),
            metrics: None,
        }
    }

    /// Replaces the HTTP fetcher derived from `IdentityConfig::jwks_url`.
    pub fn with_key_source(mut self, source: Arc<dyn KeySource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Pins a key; a verifier built only from pinned keys never fetches.
    pub fn with_signing_key(mut self, key: SigningKey) -> Self {
        self.static_keys.push(key);
        self
    }

    pub fn with_metrics(mut self, metrics: IdentityMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds without contacting the provider; keys are fetched on first use.
    pub fn build(self) -> Result<TokenVerifier, KeySetError> {
        let policy = self.config.key_cache.clone();
        let mut keys = match self.source {
            Some(source) => KeySetCache::new(source, policy),
            None if !self.static_keys.is_empty() => KeySetCache::from_keys(self.static_keys),
            None => {
                let fetcher =
                    JwksFetcher::with_timeout(self.config.jwks_url.clone(), policy.fetch_timeout)?;
                KeySetCache::with_source(fetcher, policy)
            }
        };
        if let Some(metrics) = &self.metrics {
            keys = keys.with_metrics(metrics.clone());
        }

        Ok(TokenVerifier {
            config: self.config,
            keys,
            metrics: self.metrics,
        })
    }
}
