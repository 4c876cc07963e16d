//! Request orchestration
//!
//! Every REST call runs the same sequence. The exchange-specific steps are
//! delegated to [`ExchangeHooks`]:
//!
//! 1. take a rate-gate slot (the only intentional wait), bounded by the
//!    request deadline
//! 2. insert a fresh nonce for authenticated calls
//! 3. `build_url`, then `serialize_body`
//! 4. `sign`
//! 5. transport call, bounded by what remains of the deadline
//! 6. `validate_response`, then decode into the caller's type
//!
//! The slot is taken before the nonce is drawn so that signed timestamps do
//! not age while queued and nonces leave in the order they were issued.
//! Cacheable public GETs run the whole sequence inside the response cache.

use crate::auth::{query_value, Credentials};
use crate::cache::{CacheKey, ResponseCache};
use crate::config::ExchangeConfig;
use crate::errors::{ExchangeError, Result};
use crate::http::{HttpRequest, HttpTransport, Method};
use crate::rate_gate::RateGate;
use crate::traits::ExchangeHooks;
use omniex_core::{NonceGenerator, PerfTimer};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Ordered request parameters
pub type Payload = Vec<(String, Value)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Security {
    Public,
    /// API key attached, no nonce or signature
    ApiKey,
    /// Nonce inserted and request signed
    Signed,
}

/// One logical REST call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    /// Overrides the connection's base URL (separate API hosts)
    pub base_url: Option<String>,
    pub payload: Payload,
    pub security: Security,
    /// Serve from the response cache for this long; public GETs only
    pub cache_ttl: Option<Duration>,
    /// Overrides the connection's request timeout
    pub timeout: Option<Duration>,
    /// Rate-gate slots this call costs
    pub weight: u32,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            base_url: None,
            payload: Vec::new(),
            security: Security::Public,
            cache_ttl: None,
            timeout: None,
            weight: 1,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.push((key.into(), value.into()));
        self
    }

    pub fn param_opt<V: Into<Value>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    pub fn signed(mut self) -> Self {
        self.security = Security::Signed;
        self
    }

    pub fn api_key(mut self) -> Self {
        self.security = Security::ApiKey;
        self
    }

    pub fn cached(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn is_cacheable(&self) -> bool {
        self.method == Method::Get
            && self.security == Security::Public
            && self.cache_ttl.is_some_and(|ttl| !ttl.is_zero())
    }

    pub fn cache_key(&self) -> CacheKey {
        let rendered: Vec<(&str, String)> = self.payload.iter().map(|(k, v)| (k.as_str(), query_value(v))).collect();
        let mut params: Vec<(&str, &str)> = Vec::with_capacity(rendered.len() + 1);
        params.push(("@base", self.base_url.as_deref().unwrap_or("")));
        params.extend(rendered.iter().map(|(k, v)| (*k, v.as_str())));
        CacheKey::new(&format!("{} {}", self.method, self.path), &params)
    }
}

/// Shared REST machinery for one exchange connection
///
/// All mutable state (nonce counter, rate window, cache slots) belongs to
/// this connection; clones share it, nothing else does.
#[derive(Clone)]
pub struct RequestPipeline {
    hooks: Arc<dyn ExchangeHooks>,
    transport: Arc<dyn HttpTransport>,
    config: ExchangeConfig,
    credentials: Option<Credentials>,
    nonces: Arc<NonceGenerator>,
    gate: Arc<RateGate>,
    cache: Arc<ResponseCache>,
}

impl RequestPipeline {
    pub fn new(hooks: Arc<dyn ExchangeHooks>, transport: Arc<dyn HttpTransport>, config: ExchangeConfig) -> Self {
        let nonces = NonceGenerator::new(hooks.nonce_format());
        nonces.set_offset_millis(config.nonce_offset_ms);
        let gate = RateGate::from_limit(config.rate_limit);

        Self {
            hooks,
            transport,
            config,
            credentials: None,
            nonces: Arc::new(nonces),
            gate: Arc::new(gate),
            cache: Arc::new(ResponseCache::new()),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Replace the nonce source (a generator on a test clock, or one shared
    /// with another pipeline using the same key)
    pub fn with_nonce_generator(mut self, nonces: Arc<NonceGenerator>) -> Self {
        self.nonces = nonces;
        self
    }

    pub fn hooks(&self) -> &Arc<dyn ExchangeHooks> {
        &self.hooks
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn nonces(&self) -> &Arc<NonceGenerator> {
        &self.nonces
    }

    pub fn gate(&self) -> &RateGate {
        &self.gate
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Run `request` and decode the validated result into `T`
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let value = self.execute_value(request).await?;
        serde_json::from_value(value).map_err(|e| {
            ExchangeError::Decode(format!("{} response did not match the expected shape: {e}", self.hooks.name()))
        })
    }

    /// Run `request` and return the validated, unwrapped JSON
    pub async fn execute_value(&self, request: ApiRequest) -> Result<Value> {
        if let (true, Some(ttl)) = (request.is_cacheable(), request.cache_ttl) {
            let key = request.cache_key();
            let value = self.cache.get_or_compute(&key, ttl, || self.dispatch(&request)).await?;
            return Ok(value.as_ref().clone());
        }
        self.dispatch(&request).await
    }

    /// Steps 2-4 without any I/O: the exact request that would be sent
    pub fn prepare(&self, request: &ApiRequest) -> Result<HttpRequest> {
        let mut payload = request.payload.clone();

        let credentials = match request.security {
            Security::Public => None,
            Security::ApiKey | Security::Signed => Some(
                self.credentials
                    .as_ref()
                    .ok_or_else(|| ExchangeError::MissingCredentials(format!("{} API key", self.hooks.name())))?,
            ),
        };
        let nonce = match request.security {
            Security::Signed => {
                let nonce = self.nonces.next();
                payload.push((self.hooks.nonce_field().to_string(), nonce.to_json()));
                Some(nonce)
            }
            _ => None,
        };

        let base_url = request.base_url.as_deref().unwrap_or(&self.config.base_url);
        let url = self.hooks.build_url(base_url, &request.path, request.method, &mut payload)?;
        let mut http = HttpRequest::new(request.method, url.as_str());
        http.body = self.hooks.serialize_body(request.method, &payload)?;

        if let Some(credentials) = credentials {
            self.hooks.sign(&mut http, &payload, credentials, nonce.as_ref())?;
        }
        if http.body.is_some() && http.header("Content-Type").is_none() {
            http.set_header("Content-Type", "application/json");
        }
        Ok(http)
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<Value> {
        let timeout = request.timeout.unwrap_or_else(|| self.config.request_timeout());
        let deadline = Instant::now() + timeout;

        self.gate.acquire_until(request.weight, deadline).await?;

        let _timer = PerfTimer::start(format!("{} {} {}", self.hooks.name(), request.method, request.path));
        let http = self.prepare(request)?;
        debug!("➡️ {} {} {}", self.hooks.name(), http.method, redact_query(&http.url));

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ExchangeError::Timeout(format!("{} {} deadline passed before sending", self.hooks.name(), request.path)));
        }
        let response = monoio::time::timeout(remaining, self.transport.execute(http))
            .await
            .map_err(|_| {
                ExchangeError::Timeout(format!("{} {} timed out after {:?}", self.hooks.name(), request.path, timeout))
            })??;
        debug!("⬅️ {} {} HTTP {} ({} bytes)", self.hooks.name(), request.path, response.status, response.body.len());

        self.hooks.validate_response(&response)
    }
}

/// URL without its query string, for logs; queries may carry signatures
fn redact_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("exchange", &self.hooks.name())
            .field("base_url", &self.config.base_url)
            .field("gate", &self.gate)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}
