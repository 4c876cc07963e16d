//! Request nonces
//!
//! One [`NonceGenerator`] lives for the whole lifetime of an exchange
//! connection. Each value is derived from the clock, but never falls below
//! `last + 1`. Two calls in the same millisecond (or second) therefore still
//! get distinct, increasing values, and a clock stepping backwards cannot
//! produce a nonce the exchange has already seen.
//!
//! In the seconds formats a burst of more than one request per second runs
//! ahead of the wall clock. Exchanges that use seconds nonces only check
//! that the value increases, so this is acceptable.

use crate::timing::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Wire format an exchange expects for its nonce field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonceFormat {
    UnixSeconds,
    UnixSecondsString,
    UnixMillis,
    UnixMillisString,
    /// Plain counter seeded from wall-clock milliseconds at construction
    Counter,
}

impl NonceFormat {
    fn is_string(&self) -> bool {
        matches!(self, NonceFormat::UnixSecondsString | NonceFormat::UnixMillisString)
    }
}

/// A generated nonce, already in the exchange's wire type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Nonce {
    Integer(u64),
    Text(String),
}

impl Nonce {
    /// Numeric value regardless of wire type
    pub fn value(&self) -> u64 {
        match self {
            Nonce::Integer(v) => *v,
            Nonce::Text(s) => s.parse().unwrap_or_default(),
        }
    }

    /// JSON representation for body-signed exchanges
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Nonce::Integer(v) => serde_json::Value::from(*v),
            Nonce::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Nonce::Integer(v) => write!(f, "{v}"),
            Nonce::Text(s) => f.write_str(s),
        }
    }
}

struct NonceState {
    last: u64,
    offset_millis: i64,
}

/// Monotonic nonce source for one exchange connection
pub struct NonceGenerator {
    format: NonceFormat,
    clock: Arc<dyn Clock>,
    state: Mutex<NonceState>,
}

impl NonceGenerator {
    pub fn new(format: NonceFormat) -> Self {
        Self::with_clock(format, Arc::new(SystemClock))
    }

    pub fn with_clock(format: NonceFormat, clock: Arc<dyn Clock>) -> Self {
        let seed = match format {
            NonceFormat::Counter => clock.now_millis(),
            _ => 0,
        };
        Self {
            format,
            clock,
            state: Mutex::new(NonceState {
                last: seed,
                offset_millis: 0,
            }),
        }
    }

    pub fn format(&self) -> NonceFormat {
        self.format
    }

    /// Shift generated values by the measured exchange clock skew.
    ///
    /// Lowering the offset never makes the sequence go backwards.
    pub fn set_offset_millis(&self, offset_millis: i64) {
        let mut state = self.lock_state();
        state.offset_millis = offset_millis;
    }

    pub fn offset_millis(&self) -> i64 {
        self.lock_state().offset_millis
    }

    /// Produce the next nonce. Never fails and never repeats.
    pub fn next(&self) -> Nonce {
        let value = self.next_value();
        if self.format.is_string() {
            Nonce::Text(value.to_string())
        } else {
            Nonce::Integer(value)
        }
    }

    fn next_value(&self) -> u64 {
        let mut state = self.lock_state();
        let candidate = match self.format {
            NonceFormat::Counter => 0,
            NonceFormat::UnixSeconds | NonceFormat::UnixSecondsString => {
                let millis = shifted(self.clock.now_millis(), state.offset_millis);
                millis / 1000
            }
            NonceFormat::UnixMillis | NonceFormat::UnixMillisString => {
                shifted(self.clock.now_millis(), state.offset_millis)
            }
        };
        let value = candidate.max(state.last.saturating_add(1));
        state.last = value;
        value
    }

    // A panic while holding the lock cannot leave `last` half-written,
    // so a poisoned state is still valid.
    fn lock_state(&self) -> std::sync::MutexGuard<'_, NonceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for NonceGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("NonceGenerator")
            .field("format", &self.format)
            .field("last", &state.last)
            .field("offset_millis", &state.offset_millis)
            .finish()
    }
}

fn shifted(millis: u64, offset: i64) -> u64 {
    if offset >= 0 {
        millis.saturating_add(offset as u64)
    } else {
        millis.saturating_sub(offset.unsigned_abs())
    }
}
