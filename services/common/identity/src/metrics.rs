use prometheus::{IntCounterVec, Opts, Registry};

/// Counters for token verification and key set fetches.
#[derive(Clone)]
pub struct IdentityMetrics {
    verifications: IntCounterVec,
    jwks_fetches: IntCounterVec,
}

impl IdentityMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let verifications = IntCounterVec::new(
            Opts::new(
                "identity_token_verifications_total",
                "Bearer token verifications grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(verifications.clone()))?;

        let jwks_fetches = IntCounterVec::new(
            Opts::new(
                "identity_jwks_fetches_total",
                "Signing key set fetches grouped by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(jwks_fetches.clone()))?;

        Ok(Self {
            verifications,
            jwks_fetches,
        })
    }

    /// `outcome` is `verified` or a `VerificationFailure::kind` label.
    pub fn verification(&self, outcome: &str) {
        self.verifications.with_label_values(&[outcome]).inc();
    }

    pub fn jwks_fetch(&self, result: &str) {
        self.jwks_fetches.with_label_values(&[result]).inc();
    }

    pub fn verification_count(&self, outcome: &str) -> u64 {
        self.verifications.with_label_values(&[outcome]).get()
    }

    pub fn jwks_fetch_count(&self, result: &str) -> u64 {
        self.jwks_fetches.with_label_values(&[result]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_registered_and_labelled() {
        let registry = Registry::new();
        let metrics = IdentityMetrics::new(&registry).expect("metrics");
        metrics.verification("verified");
        metrics.verification("token_expired");
        metrics.verification("token_expired");
        metrics.jwks_fetch("error");

        assert_eq!(metrics.verification_count("verified"), 1);
        assert_eq!(metrics.verification_count("token_expired"), 2);
        assert_eq!(metrics.jwks_fetch_count("error"), 1);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"identity_token_verifications_total".to_string()));
        assert!(names.contains(&"identity_jwks_fetches_total".to_string()));
    }

    #[test]
    fn double_registration_fails() {
        let registry = Registry::new();
        IdentityMetrics::new(&registry).expect("first registration");
        assert!(IdentityMetrics::new(&registry).is_err());
    }
}
