use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::KeyCachePolicy;
use crate::error::{KeySetError, VerificationFailure};
use crate::jwks::{KeySource, SigningKey};
use crate::metrics::IdentityMetrics;

/// Immutable snapshot of the provider's keys as of one fetch.
#[derive(Debug, Default)]
pub struct KeySet {
    keys: Vec<SigningKey>,
    fetched_at: Option<Instant>,
    generation: u64,
}

impl KeySet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Exact, case-sensitive `kid` lookup.
    pub fn find(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.iter().find(|key| key.kid() == kid)
    }

    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Increments on every successful store; zero for sets that never came from a fetch.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }
}

#[derive(Default)]
struct CacheState {
    current: Option<Arc<KeySet>>,
    last_attempt: Option<Instant>,
    last_error: Option<KeySetError>,
    generation: u64,
}

/// Caches the signing keys published by the identity provider.
///
/// Readers always get a whole `Arc<KeySet>` snapshot; a refresh swaps the
/// snapshot in one write. Fetches are single-flight: callers that need a fetch
/// while another one is running wait for it and reuse its result.
pub struct KeySetCache {
    source: Option<Arc<dyn KeySource>>,
    policy: KeyCachePolicy,
    state: RwLock<CacheState>,
    refresh_gate: Mutex<()>,
    metrics: Option<IdentityMetrics>,
}

impl KeySetCache {
    pub fn new(source: Arc<dyn KeySource>, policy: KeyCachePolicy) -> Self {
        Self {
            source: Some(source),
            policy,
            state: RwLock::new(CacheState::default()),
            refresh_gate: Mutex::new(()),
            metrics: None,
        }
    }

    pub fn with_source<S>(source: S, policy: KeyCachePolicy) -> Self
    where
        S: KeySource + 'static,
    {
        Self::new(Arc::new(source), policy)
    }

    /// A fixed key set that is never refetched.
    pub fn from_keys(keys: Vec<SigningKey>) -> Self {
        let set = Arc::new(KeySet {
            keys,
            fetched_at: None,
            generation: 0,
        });
        Self {
            source: None,
            policy: KeyCachePolicy {
                ttl: None,
                ..KeyCachePolicy::default()
            },
            state: RwLock::new(CacheState {
                current: Some(set),
                ..CacheState::default()
            }),
            refresh_gate: Mutex::new(()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: IdentityMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> &KeyCachePolicy {
        &self.policy
    }

    /// Current snapshot without triggering a fetch.
    pub fn current(&self) -> Option<Arc<KeySet>> {
        self.read_state().current.clone()
    }

    /// Returns the cached keys, fetching them when the cache is empty or stale.
    ///
    /// Never fails: if the fetch fails the last stale set is served, and with no
    /// stale set an empty one is returned. Nothing is stored on failure, so the
    /// next call fetches again once the cooldown has passed.
    pub async fn get_keys(&self) -> Arc<KeySet> {
        match self.usable_set().await {
            Ok(set) => set,
            Err(err) => {
                warn!(error = %err, "no signing keys available, serving empty key set");
                Arc::new(KeySet::empty())
            }
        }
    }

    /// Fetches the key set now, ignoring TTL and cooldown.
    ///
    /// Returns the number of keys loaded. A concurrent refresh that completes
    /// while this call waits satisfies it.
    pub async fn refresh(&self) -> Result<usize, KeySetError> {
        let observed = self.observed_generation();
        let set = self.fetch_if_due(observed, true).await?;
        Ok(set.len())
    }

    /// Finds the key for `kid`, refetching once if it is not in the cached set.
    pub async fn resolve(&self, kid: &str) -> Result<SigningKey, VerificationFailure> {
        let set = self.usable_set().await?;
        if let Some(key) = set.find(kid) {
            return Ok(key.clone());
        }
        if self.source.is_none() {
            return Err(VerificationFailure::UnknownKey(kid.to_string()));
        }

        debug!(kid, generation = set.generation(), "kid not in cached key set, refetching");
        let refreshed = self.fetch_if_due(set.generation(), false).await?;
        refreshed
            .find(kid)
            .cloned()
            .ok_or_else(|| VerificationFailure::UnknownKey(kid.to_string()))
    }

    async fn usable_set(&self) -> Result<Arc<KeySet>, KeySetError> {
        let current = self.current();
        if let Some(set) = &current {
            if self.is_fresh(set) {
                return Ok(set.clone());
            }
        }
        let observed = current.as_ref().map_or(0, |set| set.generation());

        match self.fetch_if_due(observed, false).await {
            Ok(set) => Ok(set),
            Err(err) => match current {
                Some(stale) => {
                    warn!(error = %err, generation = stale.generation(), "serving stale key set");
                    Ok(stale)
                }
                None => Err(err),
            },
        }
    }

    /// Runs at most one fetch at a time.
    ///
    /// `observed` is the generation the caller saw before deciding to fetch; if
    /// another caller stored a newer set in the meantime it is returned as is.
    /// Without `force`, a fetch attempted within the cooldown window is not
    /// repeated: its error or its set is reused instead.
    async fn fetch_if_due(&self, observed: u64, force: bool) -> Result<Arc<KeySet>, KeySetError> {
        let _gate = self.refresh_gate.lock().await;

        {
            let state = self.read_state();
            if let Some(current) = &state.current {
                if current.generation() != observed {
                    return Ok(current.clone());
                }
            }
            if !force {
                let cooling = state
                    .last_attempt
                    .is_some_and(|at| at.elapsed() < self.policy.refresh_cooldown);
                if cooling {
                    if let Some(err) = &state.last_error {
                        return Err(err.clone());
                    }
                    if let Some(current) = &state.current {
                        return Ok(current.clone());
                    }
                }
            }
        }

        self.fetch_now().await
    }

    async fn fetch_now(&self) -> Result<Arc<KeySet>, KeySetError> {
        let Some(source) = self.source.as_ref() else {
            return Err(KeySetError::NoSource);
        };

        let timeout = self.policy.fetch_timeout;
        let outcome = match tokio::time::timeout(timeout, source.fetch()).await {
            Ok(Ok(keys)) if keys.is_empty() => Err(KeySetError::Empty),
            Ok(result) => result,
            Err(_) => Err(KeySetError::Timeout(timeout)),
        };

        let now = Instant::now();
        let mut state = self.write_state();
        state.last_attempt = Some(now);
        match outcome {
            Ok(keys) => {
                state.generation += 1;
                let set = Arc::new(KeySet {
                    keys,
                    fetched_at: Some(now),
                    generation: state.generation,
                });
                state.current = Some(set.clone());
                state.last_error = None;
                drop(state);

                self.record_fetch("ok");
                info!(
                    source = %source.describe(),
                    key_count = set.len(),
                    generation = set.generation(),
                    "signing key set refreshed"
                );
                Ok(set)
            }
            Err(err) => {
                state.last_error = Some(err.clone());
                drop(state);

                self.record_fetch("error");
                warn!(source = %source.describe(), error = %err, "signing key fetch failed");
                Err(err)
            }
        }
    }

    fn is_fresh(&self, set: &KeySet) -> bool {
        match (self.policy.ttl, set.fetched_at()) {
            (Some(ttl), Some(fetched_at)) => fetched_at.elapsed() < ttl,
            _ => true,
        }
    }

    fn observed_generation(&self) -> u64 {
        self.current().map_or(0, |set| set.generation())
    }

    fn record_fetch(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.jwks_fetch(result);
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
