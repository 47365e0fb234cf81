//! In-memory response cache with single-flight population.
//!
//! Entries are keyed by a request fingerprint (method + path + query +
//! tenant) and expire after the configured TTL. Population is single-flight:
//! when several requests miss on the same fingerprint at once, one of them
//! goes upstream and the rest wait for it, so a given key never has more
//! than one upstream call in flight.

use crate::services::proxy::CapturedResponse;
use ahash::HashMap as AHashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct CacheEntry {
    response: CapturedResponse,
    expires_at: Instant,
}

/// Outcome of a cache lookup.
pub enum CacheLookup {
    /// A fresh entry was found.
    Hit(CapturedResponse),
    /// The caller is responsible for populating the key; the guard releases
    /// waiting requests when dropped.
    Miss(FlightGuard),
}

/// Single-flight leadership for one fingerprint. Dropping the guard (with or
/// without a prior insert) wakes every waiter.
pub struct FlightGuard {
    cache: Arc<ResponseCacheInner>,
    key: String,
}

impl FlightGuard {
    /// Stores the captured response under the guarded fingerprint.
    pub fn insert(&self, response: CapturedResponse) {
        self.cache.insert(self.key.clone(), response);
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let notify = {
            let mut in_flight = self.cache.in_flight.write().unwrap_or_else(|e| e.into_inner());
            in_flight.remove(&self.key)
        };
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }
}

struct ResponseCacheInner {
    ttl: Duration,
    entries: RwLock<AHashMap<String, CacheEntry>>,
    in_flight: RwLock<AHashMap<String, Arc<Notify>>>,
}

impl ResponseCacheInner {
    fn get(&self, key: &str) -> Option<CapturedResponse> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.response.clone())
    }

    fn insert(&self, key: String, response: CapturedResponse) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        // Opportunistic expiry sweep keeps the map bounded without a janitor task.
        entries.retain(|_, entry| entry.expires_at > Instant::now());
        entries.insert(key, CacheEntry { response, expires_at: Instant::now() + self.ttl });
    }
}

/// Response cache shared by the routing engine.
pub struct ResponseCache {
    inner: Arc<ResponseCacheInner>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(ResponseCacheInner {
                ttl,
                entries: RwLock::new(AHashMap::default()),
                in_flight: RwLock::new(AHashMap::default()),
            }),
        }
    }

    /// Builds the fingerprint for a request.
    pub fn fingerprint(method: &str, path: &str, query: &str, tenant: Option<&str>) -> String {
        format!("{} {}?{} tenant={}", method, path, query, tenant.unwrap_or(""))
    }

    /// Looks up a fingerprint, joining an in-flight population when one
    /// exists. Returns [`CacheLookup::Miss`] with a leadership guard when the
    /// caller should go upstream.
    pub async fn lookup(&self, key: &str) -> CacheLookup {
        loop {
            if let Some(response) = self.inner.get(key) {
                return CacheLookup::Hit(response);
            }

            let waiter = {
                let mut in_flight =
                    self.inner.in_flight.write().unwrap_or_else(|e| e.into_inner());
                match in_flight.get(key) {
                    Some(notify) => Some(notify.clone()),
                    None => {
                        in_flight.insert(key.to_string(), Arc::new(Notify::new()));
                        None
                    }
                }
            };

            match waiter {
                None => {
                    return CacheLookup::Miss(FlightGuard {
                        cache: Arc::clone(&self.inner),
                        key: key.to_string(),
                    });
                }
                Some(notify) => {
                    // Register before re-checking so a leader finishing in
                    // between cannot drop the wakeup.
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    let leader_active = {
                        let in_flight =
                            self.inner.in_flight.read().unwrap_or_else(|e| e.into_inner());
                        in_flight.contains_key(key)
                    };
                    if leader_active {
                        notified.await;
                    }
                    // Loop to re-check the entry and possibly take over
                    // leadership if the leader failed to populate.
                }
            }
        }
    }

    /// Drops every cached entry. Used by module stop.
    pub fn clear(&self) {
        self.inner.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.inner.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|e| e.expires_at > Instant::now()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
