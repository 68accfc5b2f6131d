// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! ## Security
//!
//! - JWKS is fetched via HTTPS only
//! - Keys are cached with a configurable TTL
//! - Stale cache is used on fetch failure (fail-open for availability)
//! - The verification algorithm is always the one bound to the resolved
//!   key, never the one claimed by the token
//!
//! Snapshots are immutable once published; a refresh swaps in a new
//! [`KeySet`] atomically, so concurrent verifications never observe a
//! half-updated key set. Refreshes for one source are single-flight:
//! concurrent expiries produce exactly one fetch and all waiters share
//! the resulting snapshot. The fetch itself runs detached from any
//! caller, so a request that gives up mid-fetch does not abort it for
//! the others.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::AuthError;

/// Default JWKS cache TTL (5 minutes).
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Timeout for a single JWKS fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum pause between fetch attempts after a failure, so an unreachable
/// provider is not hammered once per request.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// An immutable snapshot of verification keys, indexed by key ID.
#[derive(Debug, Clone)]
pub struct KeySet {
    jwks: JwkSet,
}

impl KeySet {
    /// Wrap a parsed JWKS document.
    pub fn new(jwks: JwkSet) -> Self {
        Self { jwks }
    }

    /// Number of keys in the set.
    pub fn len(&self) -> usize {
        self.jwks.keys.len()
    }

    /// Returns whether the set contains no keys.
    pub fn is_empty(&self) -> bool {
        self.jwks.keys.is_empty()
    }

    /// Get a decoding key and its bound algorithm for the given key ID.
    pub fn decoding_key(&self, kid: &str) -> Result<(DecodingKey, Algorithm), AuthError> {
        let jwk = self
            .jwks
            .keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))
            .ok_or(AuthError::KeyNotFound)?;

        jwk_to_decoding_key(jwk)
    }
}

/// Convert a JWK to a DecodingKey.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), AuthError> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|e| AuthError::InternalError(format!("Failed to create RSA key: {e}")))?;

            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::RS256) | None => Algorithm::RS256,
                Some(KeyAlgorithm::RS384) => Algorithm::RS384,
                Some(KeyAlgorithm::RS512) => Algorithm::RS512,
                Some(other) => return Err(AuthError::UnsupportedAlgorithm(format!("{other:?}"))),
            };

            Ok((key, alg))
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let key = DecodingKey::from_ec_components(&ec.x, &ec.y)
                .map_err(|e| AuthError::InternalError(format!("Failed to create EC key: {e}")))?;

            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::ES256) | None => Algorithm::ES256,
                Some(KeyAlgorithm::ES384) => Algorithm::ES384,
                Some(other) => return Err(AuthError::UnsupportedAlgorithm(format!("{other:?}"))),
            };

            Ok((key, alg))
        }
        other => Err(AuthError::UnsupportedAlgorithm(format!("{other:?}"))),
    }
}

/// Where verification keys come from.
#[derive(Clone)]
pub enum KeySource {
    /// A fixed key set supplied at startup.
    Static(Arc<KeySet>),
    /// A remote JWKS endpoint, fetched lazily and cached.
    Remote(JwksCache),
}

impl KeySource {
    /// Resolve the current key set, refreshing the remote cache if needed.
    pub async fn resolve(&self) -> Result<Arc<KeySet>, AuthError> {
        match self {
            KeySource::Static(keys) => Ok(Arc::clone(keys)),
            KeySource::Remote(cache) => cache.resolve().await,
        }
    }
}

/// JWKS cache entry.
struct CacheEntry {
    keys: Arc<KeySet>,
    fetched_at: Instant,
}

/// Serializes refresh attempts and remembers the last failure for backoff.
#[derive(Default)]
struct RefreshState {
    last_failure: Option<Instant>,
    /// The detached fetch task. It stays here until it completes, so a
    /// waiter cancelled mid-await leaves the fetch adoptable by the next
    /// one instead of orphaning it.
    in_flight: Option<JoinHandle<Result<KeySet, AuthError>>>,
}

/// JWKS manager with caching and single-flight refresh.
#[derive(Clone)]
pub struct JwksCache {
    /// JWKS endpoint URL
    jwks_url: String,
    /// Cache TTL
    cache_ttl: Duration,
    /// Cached snapshot, replaced (never mutated) on refresh
    cache: Arc<RwLock<Option<CacheEntry>>>,
    /// Refresh gate: at most one in-flight fetch per source
    refresh: Arc<Mutex<RefreshState>>,
    /// HTTP client
    client: reqwest::Client,
}

impl JwksCache {
    /// Create a new JWKS cache.
    ///
    /// # Arguments
    /// - `jwks_url`: The JWKS endpoint URL (e.g., `https://issuer.example.com/.well-known/jwks.json`)
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache: Arc::new(RwLock::new(None)),
            refresh: Arc::new(Mutex::new(RefreshState::default())),
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Create with custom cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Get the JWKS URL.
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Get the current key set, fetching or refreshing as needed.
    pub async fn resolve(&self) -> Result<Arc<KeySet>, AuthError> {
        if let Some(keys) = self.fresh_snapshot().await {
            return Ok(keys);
        }
        self.refresh().await
    }

    /// Check if a key set is currently cached and fresh.
    pub async fn is_cached(&self) -> bool {
        self.fresh_snapshot().await.is_some()
    }

    async fn fresh_snapshot(&self) -> Option<Arc<KeySet>> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < self.cache_ttl)
            .map(|entry| Arc::clone(&entry.keys))
    }

    async fn any_snapshot(&self) -> Option<Arc<KeySet>> {
        let cache = self.cache.read().await;
        cache.as_ref().map(|entry| Arc::clone(&entry.keys))
    }

    /// Refresh the cached key set. Concurrent callers queue on the refresh
    /// gate; whoever acquires it after a completed refresh finds a fresh
    /// snapshot and returns it without fetching again.
    ///
    /// The fetch runs as a detached task: a caller that goes away
    /// mid-fetch (client timeout, dropped connection) releases the gate
    /// but does not abort the fetch, and the next waiter adopts the
    /// in-flight task instead of starting another one.
    async fn refresh(&self) -> Result<Arc<KeySet>, AuthError> {
        let mut refresh = self.refresh.lock().await;

        // Another waiter may have refreshed while we were queued.
        if let Some(keys) = self.fresh_snapshot().await {
            return Ok(keys);
        }

        // Back off after a recent failure instead of refetching per
        // request. An adoptable in-flight fetch always takes precedence.
        if refresh.in_flight.is_none() {
            if let Some(failed_at) = refresh.last_failure {
                if failed_at.elapsed() < RETRY_BACKOFF {
                    return match self.any_snapshot().await {
                        Some(keys) => Ok(keys),
                        None => Err(AuthError::JwksFetchError(
                            "JWKS endpoint unavailable, retry pending".to_string(),
                        )),
                    };
                }
            }
        }

        let task = refresh.in_flight.get_or_insert_with(|| {
            let cache = self.clone();
            tokio::spawn(async move { cache.fetch_jwks().await })
        });
        let result = task.await;
        refresh.in_flight = None;

        match result {
            Ok(Ok(keys)) => {
                refresh.last_failure = None;
                let keys = Arc::new(keys);
                let mut cache = self.cache.write().await;
                *cache = Some(CacheEntry {
                    keys: Arc::clone(&keys),
                    fetched_at: Instant::now(),
                });
                Ok(keys)
            }
            Ok(Err(err)) => {
                refresh.last_failure = Some(Instant::now());
                match self.any_snapshot().await {
                    Some(keys) => {
                        warn!(url = %self.jwks_url, error = %err, "JWKS refresh failed, serving stale snapshot");
                        Ok(keys)
                    }
                    None => Err(err),
                }
            }
            Err(err) => {
                refresh.last_failure = Some(Instant::now());
                Err(AuthError::JwksFetchError(format!(
                    "JWKS fetch task failed: {err}"
                )))
            }
        }
    }

    /// Fetch the JWKS document from the endpoint.
    async fn fetch_jwks(&self) -> Result<KeySet, AuthError> {
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::JwksFetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::JwksFetchError(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::JwksFetchError(e.to_string()))?;

        Ok(KeySet::new(jwks))
    }
}
