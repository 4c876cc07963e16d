//! Binance spot adapter
//!
//! - Every parameter travels in the query string, for all methods
//! - Signed calls carry `timestamp` + `recvWindow` and an HMAC-SHA256
//!   `signature` over the query, with the key in `X-MBX-APIKEY`
//! - Market data and user data share the combined `/stream` socket; the
//!   user-data stream is addressed by its listen key

pub mod types;

use crate::auth::{build_query_string, to_hex, Credentials};
use crate::config::ExchangeConfig;
use crate::errors::{ErrorCode, ExchangeError, Result};
use crate::http::{HttpRequest, Method};
use crate::pipeline::{ApiRequest, Payload};
use crate::reconciler::RawFill;
use crate::response::{classify_by_message, ResponseRules};
use crate::symbols::{AlgorithmicNormalizer, SymbolRules};
use crate::traits::{join_url, Capabilities, ExchangeHooks, StreamSpec};
use crate::types::{Market, OrderBook, OrderRequest, OrderSnapshot, OrderType, Ticker, TimeInForce};
use omniex_core::{unix_millis, Nonce, NonceFormat};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use url::Url;

pub use types::*;

pub const BINANCE_API_URL: &str = "https://api.binance.com";
pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443";
pub const BINANCE_TESTNET_API_URL: &str = "https://testnet.binance.vision";
pub const BINANCE_TESTNET_WS_URL: &str = "wss://stream.testnet.binance.vision";

const RECV_WINDOW_MS: u64 = 5_000;
const DEPTH_LIMITS: [u32; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];
const QUOTE_ASSETS: [&str; 12] = [
    "USDT", "FDUSD", "USDC", "TUSD", "BUSD", "BTC", "ETH", "BNB", "TRY", "EUR", "BRL", "JPY",
];

/// Production endpoints; the request-weight budget is 1200 per minute
pub fn default_config() -> ExchangeConfig {
    ExchangeConfig::new("binance", BINANCE_API_URL)
        .with_ws_url(BINANCE_WS_URL)
        .with_rate_limit(1200, 60_000)
}

pub fn testnet_config() -> ExchangeConfig {
    ExchangeConfig::new("binance", BINANCE_TESTNET_API_URL)
        .with_ws_url(BINANCE_TESTNET_WS_URL)
        .with_rate_limit(1200, 60_000)
}

/// Binance error codes that map onto a normalised [`ErrorCode`]
fn error_code(code: i64) -> ErrorCode {
    match code {
        -1003 | -1015 => ErrorCode::RateLimitExceeded,
        -1001 => ErrorCode::ConnectionLost,
        -1007 => ErrorCode::NetworkTimeout,
        -1016 => ErrorCode::SystemMaintenance,
        -1008 => ErrorCode::SystemOverload,
        -1021 => ErrorCode::TimestampExpired,
        -1022 => ErrorCode::InvalidSignature,
        -2014 => ErrorCode::InvalidApiKey,
        -2015 => ErrorCode::PermissionDenied,
        -1121 => ErrorCode::InvalidSymbol,
        -2010 => ErrorCode::InsufficientBalance,
        -2011 | -2013 => ErrorCode::OrderNotFound,
        _ => ErrorCode::Unknown,
    }
}

pub struct BinanceHooks {
    ws_url: String,
    request_ids: AtomicU64,
}

impl BinanceHooks {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            request_ids: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &ExchangeConfig) -> Self {
        Self::new(config.ws_url.clone().unwrap_or_else(|| BINANCE_WS_URL.to_string()))
    }

    fn stream_endpoint(&self) -> String {
        join_url(&self.ws_url, "stream")
    }

    fn stream_frame(&self, method: &str, stream: &str) -> String {
        let id = self.request_ids.fetch_add(1, Ordering::Relaxed);
        json!({ "method": method, "params": [stream], "id": id }).to_string()
    }

    fn combined_stream(&self, stream: &str) -> StreamSpec {
        StreamSpec::new(self.stream_endpoint(), stream)
            .subscribe_with(self.stream_frame("SUBSCRIBE", stream))
            .unsubscribe_with(self.stream_frame("UNSUBSCRIBE", stream))
    }
}

impl Default for BinanceHooks {
    fn default() -> Self {
        Self::new(BINANCE_WS_URL)
    }
}

impl ExchangeHooks for BinanceHooks {
    fn name(&self) -> &str {
        "binance"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn symbol_rules(&self) -> SymbolRules {
        AlgorithmicNormalizer::new("binance")
            .without_separator(QUOTE_ASSETS)
            .into()
    }

    fn nonce_format(&self) -> NonceFormat {
        NonceFormat::UnixMillis
    }

    fn nonce_field(&self) -> &str {
        "timestamp"
    }

    fn response_rules(&self) -> ResponseRules {
        ResponseRules::status_only().with_code_field("code", &[0])
    }

    fn build_url(&self, base_url: &str, path: &str, _method: Method, payload: &mut Payload) -> Result<Url> {
        let mut url = Url::parse(&join_url(base_url, path))?;
        if !payload.is_empty() {
            let query = build_query_string(payload.iter().map(|(k, v)| (k.as_str(), v)));
            url.set_query(Some(&query));
            payload.clear();
        }
        Ok(url)
    }

    fn serialize_body(&self, _method: Method, _payload: &Payload) -> Result<Option<String>> {
        Ok(None)
    }

    fn sign(
        &self,
        request: &mut HttpRequest,
        _payload: &Payload,
        credentials: &Credentials,
        nonce: Option<&Nonce>,
    ) -> Result<()> {
        request.set_header("X-MBX-APIKEY", credentials.public_key());
        if nonce.is_none() {
            return Ok(());
        }
        let query = request.url.split_once('?').map(|(_, query)| query).unwrap_or_default();
        let signature = to_hex(&credentials.hmac_sha256(query.as_bytes())?);
        let separator = if query.is_empty() { '?' } else { '&' };
        request.url = format!("{}{}signature={}", request.url, separator, signature);
        Ok(())
    }

    fn classify_error(&self, status: u16, code: Option<i64>, message: &str) -> ExchangeError {
        match code.map(error_code) {
            // Keep the HTTP status so 429 and 418 stay visible to the caller
            Some(ErrorCode::RateLimitExceeded) => ExchangeError::Http {
                status,
                body: message.to_string(),
            },
            Some(ErrorCode::Unknown) if status < 500 && status != 429 => ExchangeError::domain(code, message),
            Some(ErrorCode::Unknown) | None => classify_by_message(status, code, message),
            Some(known) => known.into_error(code, message),
        }
    }

    fn ticker_request(&self, native_symbol: &str) -> Result<ApiRequest> {
        Ok(ApiRequest::get("/api/v3/ticker/24hr")
            .param("symbol", native_symbol)
            .with_weight(2))
    }

    fn parse_ticker(&self, _native_symbol: &str, value: &Value) -> Result<Ticker> {
        Ok(Ticker24hr::deserialize(value)?.into_ticker())
    }

    fn order_book_request(&self, native_symbol: &str, depth: u32) -> Result<ApiRequest> {
        let limit = DEPTH_LIMITS
            .iter()
            .copied()
            .find(|limit| *limit >= depth)
            .unwrap_or(DEPTH_LIMITS[DEPTH_LIMITS.len() - 1]);
        let weight = match limit {
            0..=100 => 5,
            101..=500 => 25,
            501..=1000 => 50,
            _ => 250,
        };
        Ok(ApiRequest::get("/api/v3/depth")
            .param("symbol", native_symbol)
            .param("limit", limit)
            .with_weight(weight))
    }

    fn parse_order_book(&self, native_symbol: &str, value: &Value) -> Result<OrderBook> {
        Ok(DepthSnapshot::deserialize(value)?.into_order_book(native_symbol, unix_millis()))
    }

    fn markets_request(&self) -> Result<ApiRequest> {
        Ok(ApiRequest::get("/api/v3/exchangeInfo").with_weight(20))
    }

    fn parse_markets(&self, value: &Value) -> Result<Vec<Market>> {
        let info = ExchangeInfo::deserialize(value)?;
        Ok(info.symbols.into_iter().map(SymbolInfo::into_market).collect())
    }

    fn place_order_request(&self, native_symbol: &str, order: &OrderRequest) -> Result<ApiRequest> {
        let time_in_force = match order.order_type {
            OrderType::Limit => Some(order.time_in_force.unwrap_or(TimeInForce::GoodTillCanceled).to_string()),
            OrderType::Market => None,
        };

        Ok(ApiRequest::post("/api/v3/order")
            .param("symbol", native_symbol)
            .param("side", order.side.to_string())
            .param("type", order.order_type.to_string())
            .param_opt("timeInForce", time_in_force)
            .param("quantity", order.amount.to_plain_string())
            .param_opt("price", order.price.map(|price| price.to_plain_string()))
            .param_opt("newClientOrderId", order.client_order_id.clone())
            .param("newOrderRespType", "FULL")
            .param("recvWindow", RECV_WINDOW_MS)
            .signed())
    }

    fn cancel_order_request(&self, native_symbol: &str, order_id: &str) -> Result<ApiRequest> {
        Ok(ApiRequest::delete("/api/v3/order")
            .param("symbol", native_symbol)
            .param("orderId", order_id)
            .param("recvWindow", RECV_WINDOW_MS)
            .signed())
    }

    fn order_details_request(&self, native_symbol: &str, order_id: &str) -> Result<ApiRequest> {
        Ok(ApiRequest::get("/api/v3/order")
            .param("symbol", native_symbol)
            .param("orderId", order_id)
            .param("recvWindow", RECV_WINDOW_MS)
            .signed()
            .with_weight(4))
    }

    fn order_fills_request(&self, native_symbol: &str, order_id: &str) -> Result<Option<ApiRequest>> {
        Ok(Some(
            ApiRequest::get("/api/v3/myTrades")
                .param("symbol", native_symbol)
                .param("orderId", order_id)
                .param("recvWindow", RECV_WINDOW_MS)
                .signed()
                .with_weight(20),
        ))
    }

    fn parse_order(&self, value: &Value) -> Result<OrderSnapshot> {
        Ok(OrderResponse::deserialize(value)?.into_snapshot())
    }

    fn parse_fills(&self, value: &Value) -> Result<Vec<RawFill>> {
        let trades = Vec::<AccountTrade>::deserialize(value)?;
        Ok(trades.into_iter().map(AccountTrade::into_fill).collect())
    }

    fn ticker_stream(&self, native_symbol: &str) -> Result<StreamSpec> {
        Ok(self.combined_stream(&format!("{}@ticker", native_symbol.to_ascii_lowercase())))
    }

    fn parse_ticker_update(&self, _native_symbol: &str, payload: &Value) -> Result<Ticker> {
        Ok(TickerUpdate::deserialize(payload)?.into_ticker())
    }

    fn fills_stream_token_request(&self) -> Option<ApiRequest> {
        Some(ApiRequest::post("/api/v3/userDataStream").api_key())
    }

    // Binance drops a listen key after 60 minutes without a PUT
    fn fills_stream_keepalive_request(&self, token: &Value) -> Option<ApiRequest> {
        let listen_key = listen_key(Some(token)).ok()?;
        Some(
            ApiRequest::put("/api/v3/userDataStream")
                .param("listenKey", listen_key)
                .api_key(),
        )
    }

    fn fills_stream(&self, token: Option<&Value>) -> Result<StreamSpec> {
        let listen_key = listen_key(token)?;
        debug!("🔑 Binance user-data stream opened");
        Ok(self.combined_stream(listen_key))
    }

    fn parse_fill_update(&self, payload: &Value) -> Result<Vec<RawFill>> {
        if payload.get("e").and_then(Value::as_str) != Some("executionReport") {
            return Ok(Vec::new());
        }
        Ok(ExecutionReport::deserialize(payload)?.into_fill().into_iter().collect())
    }
}

fn listen_key(token: Option<&Value>) -> Result<&str> {
    token
        .and_then(|token| token.get("listenKey"))
        .and_then(Value::as_str)
        .ok_or_else(|| ExchangeError::Decode("userDataStream response without listenKey".to_string()))
}

impl std::fmt::Debug for BinanceHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceHooks").field("ws_url", &self.ws_url).finish()
    }
}
