use serde::{Deserialize, Serialize};

use crate::claims::VerifiedClaims;

/// The caller as seen by request handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub email_verified: bool,
}

/// Projects verified claims onto an `Identity`. Missing optional claims become
/// empty strings or `false`; this never fails.
pub fn to_identity(claims: &VerifiedClaims) -> Identity {
    let username = claims
        .provider_username
        .as_deref()
        .filter(|name| !name.is_empty())
        .or(claims.username.as_deref())
        .unwrap_or_default()
        .to_string();

    Identity {
        user_id: claims.subject.clone(),
        username,
        email: claims.email.clone().unwrap_or_default(),
        email_verified: claims.email_verified.unwrap_or(false),
    }
}

impl From<&VerifiedClaims> for Identity {
    fn from(claims: &VerifiedClaims) -> Self {
        to_identity(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn claims() -> VerifiedClaims {
        VerifiedClaims {
            subject: "user-1".into(),
            issuer: "https://idp.example/pool1".into(),
            audience: vec!["client1".into()],
            expires_at: Utc.timestamp_opt(1_900_000_000, 0).unwrap(),
            issued_at: None,
            provider_username: None,
            username: None,
            email: None,
            email_verified: None,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn subject_only_claims_get_defaults() {
        let identity = to_identity(&claims());
        assert_eq!(
            identity,
            Identity {
                user_id: "user-1".into(),
                username: String::new(),
                email: String::new(),
                email_verified: false,
            }
        );
    }

    #[test]
    fn provider_username_wins_over_generic() {
        let mut both = claims();
        both.provider_username = Some("alice".into());
        both.username = Some("generic".into());
        assert_eq!(to_identity(&both).username, "alice");

        let mut blank_provider = claims();
        blank_provider.provider_username = Some(String::new());
        blank_provider.username = Some("bob".into());
        assert_eq!(to_identity(&blank_provider).username, "bob");

        let mut generic = claims();
        generic.username = Some("generic".into());
        assert_eq!(to_identity(&generic).username, "generic");
    }

    #[test]
    fn email_fields_are_copied() {
        let mut full = claims();
        full.email = Some("alice@example.com".into());
        full.email_verified = Some(true);
        let identity = Identity::from(&full);
        assert_eq!(identity.email, "alice@example.com");
        assert!(identity.email_verified);
    }
}
