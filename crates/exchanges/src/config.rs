//! Per-connection configuration
//!
//! Read-only after construction and shared freely between concurrent
//! operations. Credentials are deliberately not part of it: they load
//! separately through [`Credentials::from_env`] and never serialize.

use crate::auth::Credentials;
use crate::errors::{ExchangeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection policy for streaming endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_ms: u64,
    pub connect_timeout_ms: u64,
    /// Ping interval; `0` disables heartbeats
    pub heartbeat_interval_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_ms: 250,
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 20_000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt `attempt` (1-based), capped at `max_delay_ms`,
    /// plus up to `jitter_ms` of jitter derived from `jitter_seed`
    pub fn backoff_delay(&self, attempt: u32, jitter_seed: u64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay_ms as f64) as u64;
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            jitter_seed % (self.jitter_ms + 1)
        };
        Duration::from_millis(capped + jitter)
    }

    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }
}

/// Outbound request budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_requests: u32,
    pub per_ms: u64,
}

impl RateLimit {
    pub fn per_second(max_requests: u32) -> Self {
        Self {
            max_requests,
            per_ms: 1000,
        }
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            per_ms: 60_000,
        }
    }
}

/// Configuration for one exchange connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub name: String,
    pub base_url: String,
    pub ws_url: Option<String>,
    pub request_timeout_ms: u64,
    /// `None` disables client-side rate limiting
    pub rate_limit: Option<RateLimit>,
    /// TTL for cached market metadata
    pub metadata_ttl_ms: u64,
    /// Applied to generated nonces to absorb local clock skew
    pub nonce_offset_ms: i64,
    /// Period of the keepalive call that holds a fills-stream token open
    pub stream_keepalive_ms: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_url: String::new(),
            ws_url: None,
            request_timeout_ms: 10_000,
            rate_limit: Some(RateLimit::per_second(10)),
            metadata_ttl_ms: 5 * 60 * 1000,
            nonce_offset_ms: 0,
            stream_keepalive_ms: 30 * 60 * 1000,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ExchangeConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ExchangeError::Configuration(format!("invalid exchange config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_rate_limit(mut self, max_requests: u32, per_ms: u64) -> Self {
        self.rate_limit = Some(RateLimit { max_requests, per_ms });
        self
    }

    pub fn without_rate_limit(mut self) -> Self {
        self.rate_limit = None;
        self
    }

    pub fn with_metadata_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.metadata_ttl_ms = ttl_ms;
        self
    }

    pub fn with_nonce_offset_ms(mut self, offset_ms: i64) -> Self {
        self.nonce_offset_ms = offset_ms;
        self
    }

    pub fn with_stream_keepalive_ms(mut self, keepalive_ms: u64) -> Self {
        self.stream_keepalive_ms = keepalive_ms;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ExchangeError::Configuration("exchange name is empty".to_string()));
        }
        url::Url::parse(&self.base_url)?;
        if let Some(ws_url) = &self.ws_url {
            url::Url::parse(ws_url)?;
        }
        if self.stream_keepalive_ms == 0 {
            return Err(ExchangeError::Configuration(format!(
                "stream keepalive period for {} must be positive",
                self.name
            )));
        }
        if let Some(limit) = self.rate_limit {
            if limit.max_requests == 0 || limit.per_ms == 0 {
                return Err(ExchangeError::Configuration(format!(
                    "rate limit for {} must allow at least one request per non-empty window",
                    self.name
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stream_keepalive(&self) -> Duration {
        Duration::from_millis(self.stream_keepalive_ms)
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_millis(self.metadata_ttl_ms)
    }

    /// Environment variable prefix for this exchange's credentials
    pub fn env_prefix(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    }

    pub fn credentials_from_env(&self) -> Result<Credentials> {
        Credentials::from_env(&self.env_prefix())
    }
}
