use std::env;
use std::time::Duration;

use thiserror::Error;

pub const ENV_REGION: &str = "COGNITO_REGION";
pub const ENV_USER_POOL_ID: &str = "COGNITO_USER_POOL_ID";
pub const ENV_CLIENT_ID: &str = "COGNITO_CLIENT_ID";
pub const ENV_LEEWAY_SECONDS: &str = "IDENTITY_LEEWAY_SECONDS";
pub const ENV_JWKS_TTL_SECONDS: &str = "IDENTITY_JWKS_TTL_SECONDS";
pub const ENV_JWKS_TIMEOUT_SECONDS: &str = "IDENTITY_JWKS_TIMEOUT_SECONDS";
pub const ENV_JWKS_COOLDOWN_SECONDS: &str = "IDENTITY_JWKS_REFRESH_COOLDOWN_SECONDS";

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },
}

/// How long fetched key sets are trusted and how eagerly they are refetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCachePolicy {
    /// Age after which a key set is refetched on next use. `None` keeps it for the process lifetime.
    pub ttl: Option<Duration>,
    /// Minimum spacing between automatic fetches: suppresses retries after a
    /// failure and refetch-on-unknown-kid right after a success.
    pub refresh_cooldown: Duration,
    /// Upper bound for a single JWKS fetch.
    pub fetch_timeout: Duration,
}

impl Default for KeyCachePolicy {
    fn default() -> Self {
        Self {
            ttl: Some(Duration::from_secs(3600)),
            refresh_cooldown: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Runtime configuration for bearer token verification.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Expected issuer claim (iss).
    pub issuer: String,
    /// Expected audience claim (aud), the provider's client id.
    pub audience: String,
    /// Where the provider publishes its signing keys.
    pub jwks_url: String,
    /// Grace period in seconds applied to `exp`. Zero by default.
    pub leeway_seconds: u32,
    pub key_cache: KeyCachePolicy,
}

impl IdentityConfig {
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        jwks_url: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            jwks_url: jwks_url.into(),
            leeway_seconds: 0,
            key_cache: KeyCachePolicy::default(),
        }
    }

    /// Issuer and JWKS location for a Cognito user pool.
    pub fn cognito(region: &str, user_pool_id: &str, client_id: impl Into<String>) -> Self {
        let issuer = format!("https://cognito-idp.{region}.amazonaws.com/{user_pool_id}");
        let jwks_url = format!("{issuer}/.well-known/jwks.json");
        Self::new(issuer, client_id, jwks_url)
    }

    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    pub fn with_key_cache(mut self, policy: KeyCachePolicy) -> Self {
        self.key_cache = policy;
        self
    }

    /// Reads the configuration from the process environment.
    ///
    /// Returns `Ok(None)` when the user pool or client id is missing, which callers
    /// treat as "authentication disabled".
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).and_then(|raw| normalize_optional(&raw));

        let (Some(user_pool_id), Some(client_id)) =
            (value(ENV_USER_POOL_ID), value(ENV_CLIENT_ID))
        else {
            return Ok(None);
        };
        let region = value(ENV_REGION).unwrap_or_else(|| DEFAULT_REGION.to_string());

        let defaults = KeyCachePolicy::default();
        let leeway_seconds = match value(ENV_LEEWAY_SECONDS) {
            Some(raw) => parse_number(ENV_LEEWAY_SECONDS, &raw)?,
            None => 0,
        };
        let ttl = match value(ENV_JWKS_TTL_SECONDS) {
            Some(raw) => match parse_number::<u64>(ENV_JWKS_TTL_SECONDS, &raw)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => defaults.ttl,
        };
        let fetch_timeout = match value(ENV_JWKS_TIMEOUT_SECONDS) {
            Some(raw) => Duration::from_secs(parse_number(ENV_JWKS_TIMEOUT_SECONDS, &raw)?),
            None => defaults.fetch_timeout,
        };
        let refresh_cooldown = match value(ENV_JWKS_COOLDOWN_SECONDS) {
            Some(raw) => Duration::from_secs(parse_number(ENV_JWKS_COOLDOWN_SECONDS, &raw)?),
            None => defaults.refresh_cooldown,
        };

        let config = Self::cognito(&region, &user_pool_id, client_id)
            .with_leeway(leeway_seconds)
            .with_key_cache(KeyCachePolicy {
                ttl,
                refresh_cooldown,
                fetch_timeout,
            });
        Ok(Some(config))
    }
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_pool_or_client_disables_auth() {
        assert!(IdentityConfig::from_lookup(lookup(&[])).unwrap().is_none());
        assert!(
            IdentityConfig::from_lookup(lookup(&[(ENV_USER_POOL_ID, "pool1")]))
                .unwrap()
                .is_none()
        );
        assert!(IdentityConfig::from_lookup(lookup(&[
            (ENV_USER_POOL_ID, "  "),
            (ENV_CLIENT_ID, "client1"),
        ]))
        .unwrap()
        .is_none());
    }

    #[test]
    fn cognito_urls_are_derived_from_region_and_pool() {
        let config = IdentityConfig::from_lookup(lookup(&[
            (ENV_REGION, "eu-west-1"),
            (ENV_USER_POOL_ID, "eu-west-1_abc"),
            (ENV_CLIENT_ID, "client1"),
        ]))
        .unwrap()
        .expect("configured");

        assert_eq!(
            config.issuer,
            "https://cognito-idp.eu-west-1.amazonaws.com/eu-west-1_abc"
        );
        assert_eq!(
            config.jwks_url,
            "https://cognito-idp.eu-west-1.amazonaws.com/eu-west-1_abc/.well-known/jwks.json"
        );
        assert_eq!(config.audience, "client1");
        assert_eq!(config.leeway_seconds, 0);
        assert_eq!(config.key_cache, KeyCachePolicy::default());
    }

    #[test]
    fn region_defaults_to_us_east_1() {
        let config = IdentityConfig::from_lookup(lookup(&[
            (ENV_USER_POOL_ID, "pool1"),
            (ENV_CLIENT_ID, "client1"),
        ]))
        .unwrap()
        .expect("configured");
        assert!(config.issuer.starts_with("https://cognito-idp.us-east-1."));
    }

    #[test]
    fn tuning_overrides_are_parsed() {
        let config = IdentityConfig::from_lookup(lookup(&[
            (ENV_USER_POOL_ID, "pool1"),
            (ENV_CLIENT_ID, "client1"),
            (ENV_LEEWAY_SECONDS, "45"),
            (ENV_JWKS_TTL_SECONDS, "0"),
            (ENV_JWKS_TIMEOUT_SECONDS, "3"),
            (ENV_JWKS_COOLDOWN_SECONDS, "5"),
        ]))
        .unwrap()
        .expect("configured");

        assert_eq!(config.leeway_seconds, 45);
        assert_eq!(config.key_cache.ttl, None);
        assert_eq!(config.key_cache.fetch_timeout, Duration::from_secs(3));
        assert_eq!(config.key_cache.refresh_cooldown, Duration::from_secs(5));
    }

    #[test]
    fn invalid_number_is_rejected() {
        let err = IdentityConfig::from_lookup(lookup(&[
            (ENV_USER_POOL_ID, "pool1"),
            (ENV_CLIENT_ID, "client1"),
            (ENV_LEEWAY_SECONDS, "-1"),
        ]))
        .expect_err("negative leeway");
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                key: ENV_LEEWAY_SECONDS,
                value: "-1".to_string()
            }
        );
    }
}
