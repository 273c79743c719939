pub mod cache;
pub mod claims;
pub mod config;
pub mod error;
pub mod extractors;
pub mod guard;
pub mod identity;
pub mod jwks;
pub mod metrics;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
pub mod verifier;

pub use cache::{KeySet, KeySetCache};
pub use claims::VerifiedClaims;
pub use config::{IdentityConfig, KeyCachePolicy};
pub use error::{KeySetError, RejectionCause, Unauthenticated, VerificationFailure, VerifyResult};
pub use extractors::{bearer_token, OptionalIdentity, RequireIdentity};
pub use guard::AuthGuard;
pub use identity::{to_identity, Identity};
pub use jwks::{JwksFetcher, KeySource, SigningKey};
pub use metrics::IdentityMetrics;
pub use verifier::{TokenVerifier, TokenVerifierBuilder};
