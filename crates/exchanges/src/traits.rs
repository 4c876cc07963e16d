//! The adapter hook interface
//!
//! One value implementing [`ExchangeHooks`] describes everything that differs
//! between exchanges: URL layout, body encoding, signing, response
//! conventions, symbol spelling, and how each logical operation maps onto
//! the exchange's endpoints and streams. The pipeline, connection manager
//! and client are written once against this trait.

use crate::auth::{build_query_string, Credentials};
use crate::errors::{ExchangeError, Result};
use crate::http::{HttpRequest, HttpResponse, Method};
use crate::pipeline::{ApiRequest, Payload};
use crate::protocol::{JsonProtocol, StreamProtocol};
use crate::reconciler::RawFill;
use crate::response::{classify_by_message, ResponseRules};
use crate::symbols::SymbolRules;
use crate::types::{Market, OrderBook, OrderRequest, OrderSnapshot, Ticker};
use omniex_core::{Nonce, NonceFormat};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// Logical operations a caller may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Ticker,
    OrderBook,
    Markets,
    PlaceOrder,
    CancelOrder,
    OrderDetails,
    TickerStream,
    FillsStream,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Ticker => "get_ticker",
            Operation::OrderBook => "get_order_book",
            Operation::Markets => "get_market_symbols",
            Operation::PlaceOrder => "place_order",
            Operation::CancelOrder => "cancel_order",
            Operation::OrderDetails => "get_order_details",
            Operation::TickerStream => "subscribe_ticker",
            Operation::FillsStream => "subscribe_fills",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an adapter offers, known without a network call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub ticker: bool,
    pub order_book: bool,
    pub markets: bool,
    pub place_order: bool,
    pub cancel_order: bool,
    pub order_details: bool,
    pub ticker_stream: bool,
    pub fills_stream: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            ticker: true,
            order_book: true,
            markets: true,
            place_order: true,
            cancel_order: true,
            order_details: true,
            ticker_stream: true,
            fills_stream: true,
        }
    }

    pub fn supports(&self, operation: Operation) -> bool {
        match operation {
            Operation::Ticker => self.ticker,
            Operation::OrderBook => self.order_book,
            Operation::Markets => self.markets,
            Operation::PlaceOrder => self.place_order,
            Operation::CancelOrder => self.cancel_order,
            Operation::OrderDetails => self.order_details,
            Operation::TickerStream => self.ticker_stream,
            Operation::FillsStream => self.fills_stream,
        }
    }
}

/// One logical stream on one socket endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub endpoint: String,
    /// Key the exchange echoes on data frames, or registers a server id for
    pub stream_key: String,
    /// Sent on every (re)connect, after the auth frame if any
    pub subscribe_frames: Vec<String>,
    /// Sent when the subscription is disposed while the socket stays open
    pub unsubscribe_frames: Vec<String>,
    /// Send [`ExchangeHooks::ws_auth_frame`] before subscribing
    pub authenticated: bool,
}

impl StreamSpec {
    pub fn new(endpoint: impl Into<String>, stream_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            stream_key: stream_key.into(),
            subscribe_frames: Vec::new(),
            unsubscribe_frames: Vec::new(),
            authenticated: false,
        }
    }

    pub fn subscribe_with(mut self, frame: impl Into<String>) -> Self {
        self.subscribe_frames.push(frame.into());
        self
    }

    pub fn unsubscribe_with(mut self, frame: impl Into<String>) -> Self {
        self.unsubscribe_frames.push(frame.into());
        self
    }

    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }
}

/// Per-exchange behaviour plugged into the shared client machinery
///
/// Only `name`, `capabilities` and `symbol_rules` are required. Transport
/// hooks default to the most common conventions, and operation hooks default
/// to [`ExchangeError::NotSupported`].
pub trait ExchangeHooks: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn symbol_rules(&self) -> SymbolRules;

    fn nonce_format(&self) -> NonceFormat {
        NonceFormat::UnixMillis
    }

    /// Payload field the nonce is inserted under
    fn nonce_field(&self) -> &str {
        "nonce"
    }

    fn response_rules(&self) -> ResponseRules {
        ResponseRules::default()
    }

    fn stream_protocol(&self) -> Arc<dyn StreamProtocol> {
        Arc::new(JsonProtocol::new())
    }

    /// Final URL; may move payload fields into the query string
    fn build_url(&self, base_url: &str, path: &str, method: Method, payload: &mut Payload) -> Result<Url> {
        default_build_url(base_url, path, method, payload)
    }

    /// Wire form of whatever payload `build_url` left behind
    fn serialize_body(&self, method: Method, payload: &Payload) -> Result<Option<String>> {
        if payload.is_empty() || method.uses_query() {
            return Ok(None);
        }
        Ok(Some(json_body(payload)))
    }

    /// Attach credentials. `nonce` is `None` for requests that only carry
    /// the API key.
    fn sign(
        &self,
        _request: &mut HttpRequest,
        _payload: &Payload,
        _credentials: &Credentials,
        _nonce: Option<&Nonce>,
    ) -> Result<()> {
        Err(ExchangeError::not_supported(self.name(), "sign"))
    }

    fn validate_response(&self, response: &HttpResponse) -> Result<Value> {
        self.response_rules()
            .validate(response, |status, code, message| self.classify_error(status, code, message))
    }

    fn classify_error(&self, status: u16, code: Option<i64>, message: &str) -> ExchangeError {
        classify_by_message(status, code, message)
    }

    fn ticker_request(&self, _native_symbol: &str) -> Result<ApiRequest> {
        Err(ExchangeError::not_supported(self.name(), Operation::Ticker.as_str()))
    }

    fn parse_ticker(&self, _native_symbol: &str, _value: &Value) -> Result<Ticker> {
        Err(ExchangeError::not_supported(self.name(), Operation::Ticker.as_str()))
    }

    fn order_book_request(&self, _native_symbol: &str, _depth: u32) -> Result<ApiRequest> {
        Err(ExchangeError::not_supported(self.name(), Operation::OrderBook.as_str()))
    }

    fn parse_order_book(&self, _native_symbol: &str, _value: &Value) -> Result<OrderBook> {
        Err(ExchangeError::not_supported(self.name(), Operation::OrderBook.as_str()))
    }

    fn markets_request(&self) -> Result<ApiRequest> {
        Err(ExchangeError::not_supported(self.name(), Operation::Markets.as_str()))
    }

    /// Markets with native symbols in `Market::symbol`
    fn parse_markets(&self, _value: &Value) -> Result<Vec<Market>> {
        Err(ExchangeError::not_supported(self.name(), Operation::Markets.as_str()))
    }

    fn place_order_request(&self, _native_symbol: &str, _order: &OrderRequest) -> Result<ApiRequest> {
        Err(ExchangeError::not_supported(self.name(), Operation::PlaceOrder.as_str()))
    }

    fn cancel_order_request(&self, _native_symbol: &str, _order_id: &str) -> Result<ApiRequest> {
        Err(ExchangeError::not_supported(self.name(), Operation::CancelOrder.as_str()))
    }

    fn order_details_request(&self, _native_symbol: &str, _order_id: &str) -> Result<ApiRequest> {
        Err(ExchangeError::not_supported(self.name(), Operation::OrderDetails.as_str()))
    }

    /// Executions for one order; `None` when `parse_order` already carries them
    fn order_fills_request(&self, _native_symbol: &str, _order_id: &str) -> Result<Option<ApiRequest>> {
        Ok(None)
    }

    /// Order placement, cancel and detail responses, native symbols
    fn parse_order(&self, _value: &Value) -> Result<OrderSnapshot> {
        Err(ExchangeError::not_supported(self.name(), Operation::OrderDetails.as_str()))
    }

    fn parse_fills(&self, _value: &Value) -> Result<Vec<RawFill>> {
        Err(ExchangeError::not_supported(self.name(), Operation::OrderDetails.as_str()))
    }

    fn ticker_stream(&self, _native_symbol: &str) -> Result<StreamSpec> {
        Err(ExchangeError::not_supported(self.name(), Operation::TickerStream.as_str()))
    }

    fn parse_ticker_update(&self, _native_symbol: &str, _payload: &Value) -> Result<Ticker> {
        Err(ExchangeError::not_supported(self.name(), Operation::TickerStream.as_str()))
    }

    /// A request whose result the fills stream needs (a listen key, a
    /// session token), fetched before subscribing
    fn fills_stream_token_request(&self) -> Option<ApiRequest> {
        None
    }

    /// Call that keeps a fills-stream token alive, repeated every
    /// `stream_keepalive_ms` while the subscription lives
    fn fills_stream_keepalive_request(&self, _token: &Value) -> Option<ApiRequest> {
        None
    }

    fn fills_stream(&self, _token: Option<&Value>) -> Result<StreamSpec> {
        Err(ExchangeError::not_supported(self.name(), Operation::FillsStream.as_str()))
    }

    /// Fills carried by one user-data frame; other events yield none
    fn parse_fill_update(&self, _payload: &Value) -> Result<Vec<RawFill>> {
        Err(ExchangeError::not_supported(self.name(), Operation::FillsStream.as_str()))
    }

    /// Signed login frame for private streams
    fn ws_auth_frame(&self, _credentials: &Credentials, _nonce: &Nonce) -> Result<Option<String>> {
        Ok(None)
    }
}

/// `base_url` + `path`, with the payload moved into the query string for
/// query-style methods
pub fn default_build_url(base_url: &str, path: &str, method: Method, payload: &mut Payload) -> Result<Url> {
    let mut url = Url::parse(&join_url(base_url, path))?;
    if method.uses_query() && !payload.is_empty() {
        let query = build_query_string(payload.iter().map(|(k, v)| (k.as_str(), v)));
        url.set_query(Some(&query));
        payload.clear();
    }
    Ok(url)
}

pub fn join_url(base_url: &str, path: &str) -> String {
    if path.is_empty() {
        return base_url.to_string();
    }
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// JSON object text with keys in payload order
pub fn json_body(payload: &Payload) -> String {
    let fields: Vec<String> = payload
        .iter()
        .map(|(key, value)| format!("{}:{}", Value::String(key.clone()), value))
        .collect();
    format!("{{{}}}", fields.join(","))
}

/// `application/x-www-form-urlencoded` body in payload order
pub fn form_body(payload: &Payload) -> String {
    build_query_string(payload.iter().map(|(k, v)| (k.as_str(), v)))
}
