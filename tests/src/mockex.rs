//! "Mockex": a fictional exchange for exercising the shared machinery
//!
//! Its conventions deliberately differ from Binance: JSON bodies with a
//! string nonce, a `success`/`result` envelope, HMAC-SHA512 over path and
//! body, table-driven symbols, and numeric channel ids on the socket.

use crate::fakes::request_path;
use omniex_core::{Fixed, Nonce, NonceFormat};
use omniex_exchanges::auth::{to_base64, to_hex, Credentials};
use omniex_exchanges::errors::{ExchangeError, Result};
use omniex_exchanges::http::HttpRequest;
use omniex_exchanges::pipeline::{ApiRequest, Payload};
use omniex_exchanges::protocol::{JsonProtocol, StreamProtocol};
use omniex_exchanges::reconciler::{ExchangeOrderState, RawFill};
use omniex_exchanges::response::ResponseRules;
use omniex_exchanges::symbols::{AlgorithmicNormalizer, SymbolRules, TableNormalizer};
use omniex_exchanges::traits::{Capabilities, ExchangeHooks, StreamSpec};
use omniex_exchanges::types::{
    Market, OrderBook, OrderBookLevel, OrderRequest, OrderSide, OrderSnapshot, Ticker,
};
use omniex_exchanges::config::ExchangeConfig;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};

pub const MOCKEX_API_URL: &str = "https://api.mockex.test";
pub const MOCKEX_WS_URL: &str = "wss://ws.mockex.test/v2";

/// Legacy spellings the exchange never renamed
const LEGACY_PAIRS: [(&str, &str); 2] = [("XBTUSD", "BTC-USD"), ("XDGUSD", "DOGE-USD")];

pub fn mockex_config() -> ExchangeConfig {
    ExchangeConfig::new("mockex", MOCKEX_API_URL)
        .with_ws_url(MOCKEX_WS_URL)
        .without_rate_limit()
}

#[derive(Debug, Default)]
pub struct MockexHooks {
    capabilities: Option<Capabilities>,
}

impl MockexHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise only `capabilities`
    pub fn restricted(capabilities: Capabilities) -> Self {
        Self {
            capabilities: Some(capabilities),
        }
    }
}

fn symbol_table() -> Arc<TableNormalizer> {
    static TABLE: OnceLock<Arc<TableNormalizer>> = OnceLock::new();
    TABLE
        .get_or_init(|| {
            let table = TableNormalizer::new("mockex", LEGACY_PAIRS)
                .unwrap_or_else(|e| panic!("mockex symbol table: {e}"))
                .with_fallback(AlgorithmicNormalizer::new("mockex").with_separator("_").lowercase());
            Arc::new(table)
        })
        .clone()
}

fn field<'a>(value: &'a Value, name: &str) -> Result<&'a Value> {
    value
        .get(name)
        .ok_or_else(|| ExchangeError::Decode(format!("mockex payload without {name}: {value}")))
}

fn text(value: &Value, name: &str) -> Result<String> {
    match field(value, name)? {
        Value::String(s) => Ok(s.clone()),
        other => Ok(other.to_string()),
    }
}

fn decimal(value: &Value, name: &str) -> Result<Fixed> {
    Ok(Fixed::from_json(field(value, name)?)?)
}

fn millis(value: &Value, name: &str) -> u64 {
    value.get(name).and_then(Value::as_u64).unwrap_or_default()
}

fn levels(value: &Value) -> Result<Vec<OrderBookLevel>> {
    value
        .as_array()
        .ok_or_else(|| ExchangeError::Decode(format!("mockex book side is not a list: {value}")))?
        .iter()
        .map(|level| {
            Ok(OrderBookLevel {
                price: Fixed::from_json(&level[0])?,
                amount: Fixed::from_json(&level[1])?,
            })
        })
        .collect()
}

/// `{"order_id", "trade_id", "pair", "side", "amount", "price", "fee", "fee_currency", "time"}`
pub fn parse_fill(value: &Value) -> Result<RawFill> {
    Ok(RawFill {
        order_id: text(value, "order_id")?,
        trade_id: value.get("trade_id").map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        symbol: text(value, "pair")?,
        side: OrderSide::parse(&text(value, "side")?)?,
        amount: decimal(value, "amount")?,
        price: decimal(value, "price")?,
        timestamp: millis(value, "time"),
        fee: value.get("fee").map(Fixed::from_json).transpose()?,
        fee_currency: value.get("fee_currency").and_then(Value::as_str).map(str::to_string),
    })
}

impl ExchangeHooks for MockexHooks {
    fn name(&self) -> &str {
        "mockex"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.unwrap_or_else(Capabilities::all)
    }

    fn symbol_rules(&self) -> SymbolRules {
        SymbolRules::Table(symbol_table())
    }

    fn nonce_format(&self) -> NonceFormat {
        NonceFormat::UnixMillisString
    }

    fn response_rules(&self) -> ResponseRules {
        ResponseRules::default().with_result_field("result")
    }

    fn stream_protocol(&self) -> Arc<dyn StreamProtocol> {
        Arc::new(
            JsonProtocol::new()
                .with_server_ids("chanId", &["channel", "pair"])
                .with_array_channels(),
        )
    }

    fn sign(
        &self,
        request: &mut HttpRequest,
        _payload: &Payload,
        credentials: &Credentials,
        nonce: Option<&Nonce>,
    ) -> Result<()> {
        request.set_header("API-Key", credentials.public_key());
        if nonce.is_some() {
            let message = format!("{}{}", request_path(&request.url), request.body.as_deref().unwrap_or(""));
            request.set_header("API-Sign", to_base64(&credentials.hmac_sha512(message.as_bytes())?));
        }
        Ok(())
    }

    fn ticker_request(&self, native_symbol: &str) -> Result<ApiRequest> {
        Ok(ApiRequest::get("/v1/ticker").param("pair", native_symbol))
    }

    fn parse_ticker(&self, native_symbol: &str, value: &Value) -> Result<Ticker> {
        Ok(Ticker {
            symbol: native_symbol.to_string(),
            bid: decimal(value, "bid")?,
            ask: decimal(value, "ask")?,
            last: decimal(value, "last")?,
            volume: decimal(value, "volume")?,
            timestamp: millis(value, "time"),
        })
    }

    fn order_book_request(&self, native_symbol: &str, depth: u32) -> Result<ApiRequest> {
        Ok(ApiRequest::get("/v1/book")
            .param("pair", native_symbol)
            .param("depth", depth))
    }

    fn parse_order_book(&self, native_symbol: &str, value: &Value) -> Result<OrderBook> {
        Ok(OrderBook {
            symbol: native_symbol.to_string(),
            bids: levels(field(value, "bids")?)?,
            asks: levels(field(value, "asks")?)?,
            timestamp: millis(value, "time"),
        })
    }

    fn markets_request(&self) -> Result<ApiRequest> {
        Ok(ApiRequest::get("/v1/markets"))
    }

    fn parse_markets(&self, value: &Value) -> Result<Vec<Market>> {
        value
            .as_array()
            .ok_or_else(|| ExchangeError::Decode("mockex markets is not a list".to_string()))?
            .iter()
            .map(|market| {
                Ok(Market {
                    symbol: text(market, "pair")?,
                    base: text(market, "base")?,
                    quote: text(market, "quote")?,
                    active: market.get("active").and_then(Value::as_bool).unwrap_or(true),
                })
            })
            .collect()
    }

    fn place_order_request(&self, native_symbol: &str, order: &OrderRequest) -> Result<ApiRequest> {
        Ok(ApiRequest::post("/v1/order")
            .param("pair", native_symbol)
            .param("side", order.side.to_string().to_ascii_lowercase())
            .param("type", order.order_type.to_string().to_ascii_lowercase())
            .param("amount", order.amount.to_plain_string())
            .param_opt("price", order.price.map(|price| price.to_plain_string()))
            .param_opt("client_id", order.client_order_id.clone())
            .signed())
    }

    fn cancel_order_request(&self, _native_symbol: &str, order_id: &str) -> Result<ApiRequest> {
        Ok(ApiRequest::post("/v1/order/cancel").param("id", order_id).signed())
    }

    fn order_details_request(&self, _native_symbol: &str, order_id: &str) -> Result<ApiRequest> {
        Ok(ApiRequest::post("/v1/order/status").param("id", order_id).signed())
    }

    fn order_fills_request(&self, _native_symbol: &str, order_id: &str) -> Result<Option<ApiRequest>> {
        Ok(Some(ApiRequest::post("/v1/order/trades").param("id", order_id).signed()))
    }

    fn parse_order(&self, value: &Value) -> Result<OrderSnapshot> {
        let fills = match value.get("trades").and_then(Value::as_array) {
            Some(trades) => trades.iter().map(parse_fill).collect::<Result<_>>()?,
            None => Vec::new(),
        };
        Ok(OrderSnapshot {
            order_id: text(value, "id")?,
            client_order_id: value.get("client_id").and_then(Value::as_str).map(str::to_string),
            symbol: text(value, "pair")?,
            side: OrderSide::parse(&text(value, "side")?)?,
            requested_amount: value.get("amount").map(Fixed::from_json).transpose()?,
            price: value.get("price").map(Fixed::from_json).transpose()?,
            state: ExchangeOrderState::from_native(&text(value, "status")?),
            fills,
            timestamp: millis(value, "time"),
        })
    }

    fn parse_fills(&self, value: &Value) -> Result<Vec<RawFill>> {
        value
            .as_array()
            .ok_or_else(|| ExchangeError::Decode("mockex trades is not a list".to_string()))?
            .iter()
            .map(parse_fill)
            .collect()
    }

    fn ticker_stream(&self, native_symbol: &str) -> Result<StreamSpec> {
        let subscribe = json!({"event": "subscribe", "channel": "ticker", "pair": native_symbol});
        let unsubscribe = json!({"event": "unsubscribe", "channel": "ticker", "pair": native_symbol});
        Ok(StreamSpec::new(MOCKEX_WS_URL, format!("ticker:{native_symbol}"))
            .subscribe_with(subscribe.to_string())
            .unsubscribe_with(unsubscribe.to_string()))
    }

    /// `[bid, ask, last, volume, time]`
    fn parse_ticker_update(&self, native_symbol: &str, payload: &Value) -> Result<Ticker> {
        let values = payload
            .as_array()
            .filter(|values| values.len() == 5)
            .ok_or_else(|| ExchangeError::Decode(format!("mockex ticker update: {payload}")))?;
        Ok(Ticker {
            symbol: native_symbol.to_string(),
            bid: Fixed::from_json(&values[0])?,
            ask: Fixed::from_json(&values[1])?,
            last: Fixed::from_json(&values[2])?,
            volume: Fixed::from_json(&values[3])?,
            timestamp: values[4].as_u64().unwrap_or_default(),
        })
    }

    fn fills_stream(&self, _token: Option<&Value>) -> Result<StreamSpec> {
        Ok(StreamSpec::new(MOCKEX_WS_URL, "fills")
            .subscribe_with(json!({"event": "subscribe", "channel": "fills"}).to_string())
            .authenticated())
    }

    fn parse_fill_update(&self, payload: &Value) -> Result<Vec<RawFill>> {
        match payload {
            Value::Array(fills) => fills.iter().map(parse_fill).collect(),
            single => Ok(vec![parse_fill(single)?]),
        }
    }

    fn ws_auth_frame(&self, credentials: &Credentials, nonce: &Nonce) -> Result<Option<String>> {
        let message = format!("AUTH{nonce}");
        let signature = to_hex(&credentials.hmac_sha512(message.as_bytes())?);
        Ok(Some(
            json!({
                "event": "auth",
                "key": credentials.public_key(),
                "nonce": nonce.to_string(),
                "sig": signature,
            })
            .to_string(),
        ))
    }
}
