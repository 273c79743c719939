use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Unauthenticated, VerificationFailure};
use crate::identity::{to_identity, Identity};
use crate::verifier::TokenVerifier;

/// Resolves request credentials to an `Identity`.
///
/// `require` fails closed, `optional` fails open to an anonymous caller. A guard
/// without a verifier (no identity provider configured) rejects every
/// `require` and returns `None` from every `optional`.
#[derive(Clone)]
pub struct AuthGuard {
    verifier: Option<Arc<TokenVerifier>>,
}

impl AuthGuard {
    pub fn new(verifier: Arc<TokenVerifier>) -> Self {
        Self {
            verifier: Some(verifier),
        }
    }

    pub fn disabled() -> Self {
        Self { verifier: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.verifier.is_some()
    }

    pub fn verifier(&self) -> Option<&Arc<TokenVerifier>> {
        self.verifier.as_ref()
    }

    pub async fn require(&self, token: Option<&str>) -> Result<Identity, Unauthenticated> {
        let Some(token) = token else {
            debug!("rejecting request without bearer credential");
            return Err(Unauthenticated::missing_credential());
        };

        match self.resolve(token).await {
            Ok(identity) => Ok(identity),
            Err(failure) => {
                warn!(reason = failure.kind(), error = %failure, "rejecting bearer token");
                Err(failure.into())
            }
        }
    }

    pub async fn optional(&self, token: Option<&str>) -> Option<Identity> {
        let token = token?;
        match self.resolve(token).await {
            Ok(identity) => Some(identity),
            Err(failure) => {
                debug!(
                    reason = failure.kind(),
                    error = %failure,
                    "ignoring invalid bearer token on optional route"
                );
                None
            }
        }
    }

    async fn resolve(&self, token: &str) -> Result<Identity, VerificationFailure> {
        let verifier = self
            .verifier
            .as_ref()
            .ok_or(VerificationFailure::NotConfigured)?;
        let claims = verifier.verify(token).await?;
        Ok(to_identity(&claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::error::RejectionCause;
    use crate::testing::{TestKeyPair, TokenBuilder, TEST_AUDIENCE, TEST_ISSUER};
    use serde_json::json;

    fn guard() -> AuthGuard {
        let verifier = TokenVerifier::builder(IdentityConfig::new(
            TEST_ISSUER,
            TEST_AUDIENCE,
            "http://unused.invalid/jwks",
        ))
        .with_signing_key(TestKeyPair::shared().signing_key("k1"))
        .build()
        .expect("verifier");
        AuthGuard::new(Arc::new(verifier))
    }

    #[tokio::test]
    async fn require_without_token_is_unauthenticated() {
        let err = guard().require(None).await.expect_err("no token");
        assert_eq!(err.cause(), &RejectionCause::MissingCredential);
    }

    #[tokio::test]
    async fn optional_without_token_is_absent() {
        assert_eq!(guard().optional(None).await, None);
    }

    #[tokio::test]
    async fn valid_token_resolves_identity_in_both_modes() {
        let guard = guard();
        let token = TokenBuilder::new("user-42")
            .claim("username", json!("bob"))
            .claim("email", json!("bob@example.com"))
            .sign(TestKeyPair::shared());

        let required = guard.require(Some(&token)).await.expect("identity");
        assert_eq!(required.user_id, "user-42");
        assert_eq!(required.username, "bob");
        assert_eq!(required.email, "bob@example.com");
        assert!(!required.email_verified);

        assert_eq!(guard.optional(Some(&token)).await, Some(required));
    }

    #[tokio::test]
    async fn blank_provider_username_falls_back_to_username() {
        let token = TokenBuilder::new("user-5")
            .claim("cognito:username", json!(""))
            .claim("username", json!("bob"))
            .sign(TestKeyPair::shared());
        let identity = guard().require(Some(&token)).await.expect("identity");
        assert_eq!(identity.username, "bob");
    }

    #[tokio::test]
    async fn invalid_tokens_fail_required_and_vanish_for_optional() {
        let guard = guard();
        let expired = TokenBuilder::new("user-1")
            .expires_in(-10)
            .sign(TestKeyPair::shared());
        let foreign = TokenBuilder::new("user-1").sign(TestKeyPair::other());

        for token in ["garbage", "a.b.c", expired.as_str(), foreign.as_str()] {
            let err = guard.require(Some(token)).await.expect_err("rejected");
            assert!(matches!(err.cause(), RejectionCause::Verification(_)));
            assert_eq!(err.message(), "Invalid or expired token.");
            assert_eq!(guard.optional(Some(token)).await, None);
        }

        let err = guard.require(Some(&expired)).await.expect_err("expired");
        assert_eq!(
            err.cause(),
            &RejectionCause::Verification(VerificationFailure::TokenExpired)
        );
    }

    #[tokio::test]
    async fn disabled_guard_rejects_and_stays_anonymous() {
        let guard = AuthGuard::disabled();
        assert!(!guard.is_enabled());
        let token = TokenBuilder::new("user-1").sign(TestKeyPair::shared());

        let err = guard.require(Some(&token)).await.expect_err("disabled");
        assert_eq!(
            err.cause(),
            &RejectionCause::Verification(VerificationFailure::NotConfigured)
        );
        assert!(guard.require(None).await.is_err());
        assert_eq!(guard.optional(Some(&token)).await, None);
        assert_eq!(guard.optional(None).await, None);
    }
}
