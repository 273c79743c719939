use chrono::{DateTime, TimeZone, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{VerificationFailure, VerifyResult};

/// Claims of a token whose signature, expiry, issuer and audience have been checked.
///
/// Only the verifier constructs these.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedClaims {
    pub subject: String,
    pub issuer: String,
    pub audience: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    /// Provider-namespaced username (`cognito:username`).
    pub provider_username: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub raw: serde_json::Value,
}

impl VerifiedClaims {
    pub fn has_audience(&self, audience: &str) -> bool {
        self.audience.iter().any(|value| value == audience)
    }
}

/// Payload as it comes off the wire, before any check beyond the signature.
#[derive(Debug, Deserialize)]
pub(crate) struct ClaimsRepr {
    sub: String,
    exp: i64,
    #[serde(default, deserialize_with = "lenient_integer")]
    iat: Option<i64>,
    iss: String,
    #[serde(default)]
    aud: Option<AudienceRepr>,
    #[serde(
        rename = "cognito:username",
        default,
        deserialize_with = "lenient_text"
    )]
    provider_username: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    username: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<FlagRepr>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AudienceRepr {
    Single(String),
    Many(Vec<String>),
}

/// Some providers send `email_verified` as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlagRepr {
    Bool(bool),
    Text(String),
    Other(IgnoredAny),
}

impl FlagRepr {
    fn into_bool(self) -> Option<bool> {
        match self {
            FlagRepr::Bool(value) => Some(value),
            FlagRepr::Text(text) => match text.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            FlagRepr::Other(_) => None,
        }
    }
}

impl ClaimsRepr {
    pub(crate) fn parse(value: &serde_json::Value) -> VerifyResult<Self> {
        if !value.is_object() {
            return Err(VerificationFailure::MalformedToken(
                "payload is not a JSON object".into(),
            ));
        }
        serde_json::from_value(value.clone())
            .map_err(|err| VerificationFailure::MalformedToken(err.to_string()))
    }

    pub(crate) fn expires_at_epoch(&self) -> i64 {
        self.exp
    }

    pub(crate) fn issuer(&self) -> &str {
        &self.iss
    }

    pub(crate) fn audience_contains(&self, expected: &str) -> bool {
        match &self.aud {
            Some(AudienceRepr::Single(item)) => item == expected,
            Some(AudienceRepr::Many(items)) => items.iter().any(|item| item == expected),
            None => false,
        }
    }

    pub(crate) fn into_verified(self, raw: serde_json::Value) -> VerifyResult<VerifiedClaims> {
        if self.sub.is_empty() {
            return Err(VerificationFailure::MalformedToken("empty sub claim".into()));
        }

        let expires_at = epoch("exp", self.exp)?;
        let issued_at = self
            .iat
            .and_then(|iat| Utc.timestamp_opt(iat, 0).single());

        let audience = match self.aud {
            Some(AudienceRepr::Single(item)) => vec![item],
            Some(AudienceRepr::Many(items)) => items,
            None => Vec::new(),
        };

        Ok(VerifiedClaims {
            subject: self.sub,
            issuer: self.iss,
            audience,
            expires_at,
            issued_at,
            provider_username: self.provider_username,
            username: self.username,
            email: self.email,
            email_verified: self.email_verified.and_then(FlagRepr::into_bool),
            raw,
        })
    }
}

/// Optional profile claims of an unexpected JSON type are treated as absent.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        _ => None,
    })
}

fn lenient_integer<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(|value| value.as_i64()))
}

fn epoch(claim: &str, seconds: i64) -> VerifyResult<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single().ok_or_else(|| {
        VerificationFailure::MalformedToken(format!("claim '{claim}' out of range: {seconds}"))
    })
}
