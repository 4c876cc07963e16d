//! Outbound request throttling
//!
//! A sliding-window counter per exchange connection. A slot is recorded
//! only at the moment it is granted, under the lock. A waiter that is
//! cancelled or times out has therefore consumed nothing.

use crate::config::RateLimit;
use crate::errors::{ExchangeError, Result};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct RateGate {
    max_requests: usize,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateGate {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1) as usize,
            window,
            grants: Mutex::new(VecDeque::with_capacity((max_requests as usize).min(1024))),
        }
    }

    /// A gate that never waits
    pub fn unlimited() -> Self {
        Self::new(u32::MAX, Duration::ZERO)
    }

    pub fn from_limit(limit: Option<RateLimit>) -> Self {
        match limit {
            Some(limit) => Self::new(limit.max_requests, Duration::from_millis(limit.per_ms)),
            None => Self::unlimited(),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.window.is_zero()
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Slots that could be granted right now
    pub fn available(&self) -> usize {
        if self.is_unlimited() {
            return self.max_requests;
        }
        let mut grants = self.lock_grants();
        Self::prune(&mut grants, Instant::now(), self.window);
        self.max_requests.saturating_sub(grants.len())
    }

    /// Take `n` slots if they are free now, otherwise leave the gate untouched
    pub fn try_acquire(&self, n: u32) -> bool {
        let n = self.clamp(n);
        self.try_reserve(n, Instant::now()).is_ok()
    }

    /// Wait until `n` slots are free, then take them
    pub async fn acquire(&self, n: u32) {
        let n = self.clamp(n);
        loop {
            match self.try_reserve(n, Instant::now()) {
                Ok(()) => return,
                Err(wait) => {
                    debug!("⏳ Rate gate full, waiting {:?}", wait);
                    monoio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up at `deadline` with a
    /// transport timeout, leaving the gate untouched
    pub async fn acquire_until(&self, n: u32, deadline: Instant) -> Result<()> {
        let n = self.clamp(n);
        loop {
            let now = Instant::now();
            let wait = match self.try_reserve(n, now) {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            let remaining = deadline.saturating_duration_since(now);
            if remaining < wait {
                if !remaining.is_zero() {
                    monoio::time::sleep(remaining).await;
                }
                // One last try: a slot may have aged out exactly at the deadline
                return match self.try_reserve(n, Instant::now()) {
                    Ok(()) => Ok(()),
                    Err(_) => Err(ExchangeError::Timeout(format!(
                        "rate gate wait for {n} slot(s) exceeded the deadline"
                    ))),
                };
            }
            monoio::time::sleep(wait).await;
        }
    }

    pub async fn acquire_timeout(&self, n: u32, timeout: Duration) -> Result<()> {
        self.acquire_until(n, Instant::now() + timeout).await
    }

    fn clamp(&self, n: u32) -> usize {
        let n = n.max(1) as usize;
        if n > self.max_requests {
            warn!(
                "⚠️ Requested {} slots but the window only holds {}; clamping",
                n, self.max_requests
            );
            self.max_requests
        } else {
            n
        }
    }

    /// Grant now, or report how long until enough grants age out
    fn try_reserve(&self, n: usize, now: Instant) -> std::result::Result<(), Duration> {
        if self.is_unlimited() {
            return Ok(());
        }
        let mut grants = self.lock_grants();
        Self::prune(&mut grants, now, self.window);

        if grants.len() + n <= self.max_requests {
            grants.extend(std::iter::repeat_n(now, n));
            return Ok(());
        }

        // The grant that must expire before `n` more fit
        let blocking = grants.len() + n - self.max_requests - 1;
        let wait = grants
            .get(blocking)
            .map(|granted| (*granted + self.window).saturating_duration_since(now))
            .unwrap_or(self.window);
        Err(wait.max(Duration::from_millis(1)))
    }

    fn prune(grants: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = grants.front() {
            if now.saturating_duration_since(*oldest) >= window {
                grants.pop_front();
            } else {
                break;
            }
        }
    }

    // Grants are plain timestamps, so a poisoned lock still holds valid state
    fn lock_grants(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.grants.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for RateGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGate")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .finish()
    }
}
