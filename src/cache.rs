//! In-memory cache for derived entity lookups
//!
//! Memoizes expensive per-entity operations (a route's stop list, a
//! stop's serving routes, live vehicle positions), keyed by entity code
//! and operation name. Entries are stored serialized, so any entity
//! instance with the same code shares them.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Error;

/// Validity policy for a cached operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Computed at most once per entity code for the process lifetime
    Permanent,
    /// Recomputed once the given duration has elapsed since the last
    /// computation
    TimeToLive(Duration),
}

/// Cache key: entity code plus the name of the derived operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    operation: &'static str,
    code: String,
}

impl CacheKey {
    /// Build a key for `operation` on the entity identified by `code`
    pub fn new(operation: &'static str, code: impl Into<String>) -> Self {
        Self {
            operation,
            code: code.into(),
        }
    }
}

#[derive(Debug, Default)]
struct Stores {
    values: HashMap<CacheKey, Vec<u8>>,
    expiries: HashMap<CacheKey, Instant>,
}

impl Stores {
    fn lookup(&self, key: &CacheKey, now: Instant) -> Option<&Vec<u8>> {
        if let Some(expiry) = self.expiries.get(key) {
            // A call at the expiry instant already recomputes.
            if now >= *expiry {
                return None;
            }
        }
        self.values.get(key)
    }

    fn store(&mut self, key: CacheKey, bytes: Vec<u8>, policy: CachePolicy, now: Instant) {
        match policy {
            CachePolicy::Permanent => {
                self.expiries.remove(&key);
            }
            CachePolicy::TimeToLive(ttl) => {
                self.expiries.insert(key.clone(), now + ttl);
            }
        }
        self.values.insert(key, bytes);
    }
}

/// Process-wide cache shared by every cached operation of every entity
/// type
///
/// One mutex guards both backing stores (values and expiries), so a
/// lookup or populate is a single critical section. The lock is not held
/// while the underlying computation runs: derived operations nest (a
/// stop's serving-routes scan consults each route's cached stop list),
/// so two racing callers of the same cold key may both compute it and
/// the later store wins.
#[derive(Debug)]
pub struct EntityCache {
    enabled: bool,
    stores: Mutex<Stores>,
}

impl EntityCache {
    /// Create a cache; when `enabled` is false every call is a
    /// passthrough to the underlying computation
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stores: Mutex::new(Stores::default()),
        }
    }

    /// Whether cache population is enabled
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Return the cached value for `key`, or run `compute`, store its
    /// result under `policy` and return it
    ///
    /// Errors from `compute` propagate without populating the cache.
    pub async fn get_or_compute<T, F>(
        &self,
        key: CacheKey,
        policy: CachePolicy,
        compute: F,
    ) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: Future<Output = Result<T, Error>>,
    {
        if !self.enabled {
            return compute.await;
        }

        {
            let stores = self.stores.lock().await;
            if let Some(bytes) = stores.lookup(&key, Instant::now()) {
                debug!(operation = key.operation, code = %key.code, "entity cache hit");
                return serde_json::from_slice(bytes).map_err(|e| Error::ParseError(e.to_string()));
            }
        }

        let value = compute.await?;
        let bytes = serde_json::to_vec(&value).map_err(|e| Error::ParseError(e.to_string()))?;

        let mut stores = self.stores.lock().await;
        debug!(operation = key.operation, code = %key.code, "entity cache store");
        stores.store(key, bytes, policy, Instant::now());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    async fn counted(counter: &AtomicUsize, value: u32) -> Result<u32, Error> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    #[tokio::test]
    async fn test_permanent_cache_computes_once() {
        let cache = EntityCache::new(true);
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_compute(
                CacheKey::new("stops", "0401"),
                CachePolicy::Permanent,
                counted(&calls, 7),
            )
            .await
            .unwrap();
        let second = cache
            .get_or_compute(
                CacheKey::new("stops", "0401"),
                CachePolicy::Permanent,
                counted(&calls, 99),
            )
            .await
            .unwrap();

        assert_eq!(first, 7);
        assert_eq!(second, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent_per_code_and_operation() {
        let cache = EntityCache::new(true);
        let calls = AtomicUsize::new(0);

        for key in [
            CacheKey::new("stops", "0401"),
            CacheKey::new("stops", "0402"),
            CacheKey::new("buses", "0401"),
        ] {
            cache
                .get_or_compute(key, CachePolicy::Permanent, counted(&calls, 1))
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_cache_expires_at_boundary() {
        let cache = EntityCache::new(true);
        let calls = AtomicUsize::new(0);
        let key = || CacheKey::new("position", "02521");
        let ttl = CachePolicy::TimeToLive(Duration::from_secs(30));

        let first = cache
            .get_or_compute(key(), ttl, counted(&calls, 1))
            .await
            .unwrap();
        assert_eq!(first, 1);

        tokio::time::advance(Duration::from_secs(29)).await;
        let within = cache
            .get_or_compute(key(), ttl, counted(&calls, 2))
            .await
            .unwrap();
        assert_eq!(within, 1, "a call before expiry returns the cached value");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let at_expiry = cache
            .get_or_compute(key(), ttl, counted(&calls, 3))
            .await
            .unwrap();
        assert_eq!(at_expiry, 3, "a call at expiry recomputes");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(29)).await;
        let after_reset = cache
            .get_or_compute(key(), ttl, counted(&calls, 4))
            .await
            .unwrap();
        assert_eq!(after_reset, 3, "recomputation resets the expiry window");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_passthrough() {
        let cache = EntityCache::new(false);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            cache
                .get_or_compute(
                    CacheKey::new("stops", "0401"),
                    CachePolicy::Permanent,
                    counted(&calls, 1),
                )
                .await
                .unwrap();
        }

        assert!(!cache.enabled());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = EntityCache::new(true);
        let calls = AtomicUsize::new(0);

        let failing = async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(Error::Backend("api.error.request.invalid".to_string()))
        };
        let result = cache
            .get_or_compute(CacheKey::new("stops", "0401"), CachePolicy::Permanent, failing)
            .await;
        assert!(result.is_err());

        let recovered = cache
            .get_or_compute(
                CacheKey::new("stops", "0401"),
                CachePolicy::Permanent,
                counted(&calls, 5),
            )
            .await
            .unwrap();
        assert_eq!(recovered, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_structured_values_roundtrip() {
        let cache = EntityCache::new(true);

        let stored = cache
            .get_or_compute(CacheKey::new("routes", "911"), CachePolicy::Permanent, async {
                Ok(vec!["0401".to_string(), "0501".to_string()])
            })
            .await
            .unwrap();
        let cached: Vec<String> = cache
            .get_or_compute(CacheKey::new("routes", "911"), CachePolicy::Permanent, async {
                Ok(Vec::new())
            })
            .await
            .unwrap();

        assert_eq!(stored, cached);
    }
}
