//! Wall-clock access and latency measurement
//!
//! Every time-dependent primitive (nonces, health counters) reads Unix
//! time through [`Clock`] so tests can pin it. Latency is measured on the
//! monotonic clock instead, since wall time may step.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Source of Unix time.
///
/// Implementations must be cheap and thread-safe; the nonce generator calls
/// `now_nanos` under its lock.
pub trait Clock: Send + Sync {
    /// Nanoseconds since the Unix epoch
    fn now_nanos(&self) -> u64;

    fn now_millis(&self) -> u64 {
        self.now_nanos() / 1_000_000
    }

    fn now_secs(&self) -> u64 {
        self.now_nanos() / 1_000_000_000
    }
}

/// Clock backed by `SystemTime`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now_nanos(&self) -> u64 {
        nanos()
    }
}

/// Current Unix time in nanoseconds
#[inline(always)]
pub fn nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Current Unix time in milliseconds, the unit exchanges stamp messages in
#[inline]
pub fn unix_millis() -> u64 {
    nanos() / 1_000_000
}

/// Logs the elapsed time of a scope at debug level when dropped
pub struct PerfTimer {
    start: Instant,
    name: String,
}

impl PerfTimer {
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    pub fn elapsed_nanos(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    pub fn elapsed_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn log_elapsed(&self) {
        let micros = self.elapsed_micros();
        if micros < 1000 {
            tracing::debug!("⏱️  {} took {}μs", self.name, micros);
        } else {
            tracing::debug!("⏱️  {} took {:.3}ms", self.name, micros as f64 / 1000.0);
        }
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        self.log_elapsed();
    }
}
