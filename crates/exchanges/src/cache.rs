//! Short-TTL memoization with single-flight population
//!
//! For read-only calls whose results stay valid for a while (market
//! metadata). When several callers miss on the same key at once, exactly one
//! of them (the leader) runs the computation. The others park on a flume
//! channel and receive the leader's result, success or failure. Failures are
//! never cached. If the leader is dropped mid-flight, its guard clears the
//! pending slot and the parked callers race again for leadership.

use crate::errors::{ExchangeError, Result};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

type Shared = Arc<dyn Any + Send + Sync>;
type Outcome = Result<Shared>;

/// Logical operation plus its parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(operation: &str, params: &[(&str, &str)]) -> Self {
        let mut key = operation.to_string();
        for (name, value) in params {
            key.push('|');
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

enum Slot {
    Ready { value: Shared, expires_at: Instant },
    Pending { flight: u64, waiters: Vec<flume::Sender<Outcome>> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    /// Computations actually started
    pub misses: u64,
    /// Callers that waited on someone else's computation
    pub coalesced: u64,
}

#[derive(Default)]
pub struct ResponseCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    next_flight: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

enum Step {
    Hit(Shared),
    Wait(flume::Receiver<Outcome>),
    Lead(u64),
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, or compute it at most once across
    /// all concurrent callers and keep it for `ttl`
    pub async fn get_or_compute<T, F, Fut>(&self, key: &CacheKey, ttl: Duration, compute: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut compute = Some(compute);
        loop {
            match self.step(key) {
                Step::Hit(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return downcast(key, value);
                }
                Step::Wait(rx) => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    match rx.recv_async().await {
                        Ok(outcome) => return outcome.and_then(|value| downcast(key, value)),
                        // Leader dropped before finishing; try again
                        Err(_) => continue,
                    }
                }
                Step::Lead(flight) => {
                    let Some(compute) = compute.take() else {
                        return Err(ExchangeError::Integrity(format!("cache flight for {key} restarted twice")));
                    };
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    let mut guard = FlightGuard {
                        cache: self,
                        key,
                        flight,
                        finished: false,
                    };
                    debug!("🗄️ Cache miss for {}, computing", key);

                    let outcome = compute().await.map(|value| Arc::new(value));
                    let shared = outcome.as_ref().map(|value| value.clone() as Shared).map_err(|e| e.clone());
                    self.finish(key, flight, shared, ttl);
                    guard.finished = true;
                    return outcome;
                }
            }
        }
    }

    pub fn invalidate(&self, key: &CacheKey) {
        let mut slots = self.lock_slots();
        if matches!(slots.get(key), Some(Slot::Ready { .. })) {
            slots.remove(key);
        }
    }

    /// Drop every ready entry; in-flight computations are left alone
    pub fn clear(&self) {
        self.lock_slots().retain(|_, slot| matches!(slot, Slot::Pending { .. }));
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }

    fn step(&self, key: &CacheKey) -> Step {
        let mut slots = self.lock_slots();
        match slots.get_mut(key) {
            Some(Slot::Ready { value, expires_at }) if *expires_at > Instant::now() => Step::Hit(value.clone()),
            Some(Slot::Pending { waiters, .. }) => {
                let (tx, rx) = flume::bounded(1);
                waiters.push(tx);
                Step::Wait(rx)
            }
            _ => {
                let flight = self.next_flight.fetch_add(1, Ordering::Relaxed);
                slots.insert(
                    key.clone(),
                    Slot::Pending {
                        flight,
                        waiters: Vec::new(),
                    },
                );
                Step::Lead(flight)
            }
        }
    }

    fn finish(&self, key: &CacheKey, flight: u64, outcome: Outcome, ttl: Duration) {
        let mut slots = self.lock_slots();
        let waiters = match slots.remove(key) {
            Some(Slot::Pending { flight: current, waiters }) if current == flight => waiters,
            Some(other) => {
                // Another flight owns the slot now; leave it in place
                slots.insert(key.clone(), other);
                Vec::new()
            }
            None => Vec::new(),
        };
        if let Ok(value) = &outcome {
            if !ttl.is_zero() {
                slots.insert(
                    key.clone(),
                    Slot::Ready {
                        value: value.clone(),
                        expires_at: Instant::now() + ttl,
                    },
                );
            }
        }
        drop(slots);

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn abandon(&self, key: &CacheKey, flight: u64) {
        let mut slots = self.lock_slots();
        if matches!(slots.get(key), Some(Slot::Pending { flight: current, .. }) if *current == flight) {
            // Dropping the senders wakes every waiter with a disconnect
            slots.remove(key);
            debug!("🗄️ Cache flight for {} abandoned", key);
        }
    }

    // Slots are replaced whole under the lock, so poisoning cannot expose a torn entry
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache").field("stats", &self.stats()).finish()
    }
}

struct FlightGuard<'a> {
    cache: &'a ResponseCache,
    key: &'a CacheKey,
    flight: u64,
    finished: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cache.abandon(self.key, self.flight);
        }
    }
}

fn downcast<T: Send + Sync + 'static>(key: &CacheKey, value: Shared) -> Result<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| ExchangeError::Integrity(format!("cache entry {key} holds a different type")))
}
