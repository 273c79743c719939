use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type VerifyResult<T> = Result<T, VerificationFailure>;

/// Why a bearer token was not accepted.
///
/// The variants are for logs and metrics only. At the HTTP boundary every one of
/// them renders the same `401` so callers cannot tell them apart.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationFailure {
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("token header missing kid")]
    MissingKeyId,
    #[error("no signing key published for kid '{0}'")]
    UnknownKey(String),
    #[error("token signature rejected")]
    BadSignature,
    #[error("token expired")]
    TokenExpired,
    #[error("token issuer '{0}' not trusted")]
    IssuerMismatch(String),
    #[error("token audience does not include this client")]
    AudienceMismatch,
    #[error("identity provider unreachable: {0}")]
    ProviderUnreachable(String),
    #[error("identity provider not configured")]
    NotConfigured,
}

impl VerificationFailure {
    /// Stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            VerificationFailure::MalformedToken(_) => "malformed_token",
            VerificationFailure::MissingKeyId => "missing_key_id",
            VerificationFailure::UnknownKey(_) => "unknown_key",
            VerificationFailure::BadSignature => "bad_signature",
            VerificationFailure::TokenExpired => "token_expired",
            VerificationFailure::IssuerMismatch(_) => "issuer_mismatch",
            VerificationFailure::AudienceMismatch => "audience_mismatch",
            VerificationFailure::ProviderUnreachable(_) => "provider_unreachable",
            VerificationFailure::NotConfigured => "not_configured",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for VerificationFailure {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match value.kind() {
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_)
            | ErrorKind::MissingAlgorithm
            | ErrorKind::InvalidAlgorithmName => Self::MalformedToken(value.to_string()),
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::InvalidAudience => Self::AudienceMismatch,
            _ => Self::BadSignature,
        }
    }
}

/// Failure to obtain the provider's key set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeySetError {
    #[error("failed to fetch JWKS from {url}: {reason}")]
    Transport { url: String, reason: String },
    #[error("JWKS endpoint {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("failed to parse JWKS response: {0}")]
    Decode(String),
    #[error("JWKS response contained no usable signing keys")]
    Empty,
    #[error("JWKS fetch timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("no JWKS source configured")]
    NoSource,
}

impl From<KeySetError> for VerificationFailure {
    fn from(value: KeySetError) -> Self {
        Self::ProviderUnreachable(value.to_string())
    }
}

/// Where a rejected request stopped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RejectionCause {
    #[error("no bearer credential supplied")]
    MissingCredential,
    #[error(transparent)]
    Verification(#[from] VerificationFailure),
}

/// Returned by `AuthGuard::require` when a request cannot be attributed to an identity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unauthenticated: {cause}")]
pub struct Unauthenticated {
    cause: RejectionCause,
}

impl Unauthenticated {
    pub fn missing_credential() -> Self {
        Self {
            cause: RejectionCause::MissingCredential,
        }
    }

    pub fn cause(&self) -> &RejectionCause {
        &self.cause
    }

    /// Client-facing explanation. Never depends on which check failed.
    pub fn message(&self) -> &'static str {
        match self.cause {
            RejectionCause::MissingCredential => {
                "Authentication required. Provide a bearer token in the Authorization header."
            }
            RejectionCause::Verification(_) => "Invalid or expired token.",
        }
    }
}

impl From<VerificationFailure> for Unauthenticated {
    fn from(value: VerificationFailure) -> Self {
        Self {
            cause: RejectionCause::Verification(value),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: &'static str,
}

impl IntoResponse for Unauthenticated {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: "unauthenticated",
            message: self.message(),
        };
        let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        response
    }
}
