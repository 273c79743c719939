use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap};

use crate::error::Unauthenticated;
use crate::guard::AuthGuard;
use crate::identity::Identity;

/// Caller identity on routes that must be authenticated. Rejects with `401`.
#[derive(Debug, Clone)]
pub struct RequireIdentity(pub Identity);

/// Caller identity on routes open to anonymous callers. Never rejects.
#[derive(Debug, Clone)]
pub struct OptionalIdentity(pub Option<Identity>);

#[async_trait]
impl<S> FromRequestParts<S> for RequireIdentity
where
    Arc<AuthGuard>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Unauthenticated;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let guard = Arc::<AuthGuard>::from_ref(state);
        let token = bearer_token(&parts.headers);
        guard.require(token).await.map(RequireIdentity)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for OptionalIdentity
where
    Arc<AuthGuard>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let guard = Arc::<AuthGuard>::from_ref(state);
        let token = bearer_token(&parts.headers);
        Ok(OptionalIdentity(guard.optional(token).await))
    }
}

/// The token from `Authorization: Bearer <token>`.
///
/// A missing header, another scheme or an empty token all count as no credential.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
