//! Binance wire types
//!
//! Decimal fields arrive as JSON strings and deserialize straight into
//! [`Fixed`]; symbols stay native (`BTCUSDT`) until the client maps them.

use crate::reconciler::{ExchangeOrderState, RawFill};
use crate::types::{Market, OrderBook, OrderBookLevel, OrderSide, OrderSnapshot, Ticker};
use omniex_core::Fixed;
use serde::{Deserialize, Serialize};

/// Binance order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinanceOrderSide {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl From<BinanceOrderSide> for OrderSide {
    fn from(side: BinanceOrderSide) -> Self {
        match side {
            BinanceOrderSide::Buy => OrderSide::Buy,
            BinanceOrderSide::Sell => OrderSide::Sell,
        }
    }
}

/// `GET /api/v3/ticker/24hr`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24hr {
    pub symbol: String,
    pub bid_price: Fixed,
    pub ask_price: Fixed,
    pub last_price: Fixed,
    pub volume: Fixed,
    pub close_time: u64,
}

impl Ticker24hr {
    pub fn into_ticker(self) -> Ticker {
        Ticker {
            symbol: self.symbol,
            bid: self.bid_price,
            ask: self.ask_price,
            last: self.last_price,
            volume: self.volume,
            timestamp: self.close_time,
        }
    }
}

/// `GET /api/v3/depth`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<(Fixed, Fixed)>,
    pub asks: Vec<(Fixed, Fixed)>,
}

impl DepthSnapshot {
    pub fn into_order_book(self, native_symbol: &str, timestamp: u64) -> OrderBook {
        let levels = |side: Vec<(Fixed, Fixed)>| {
            side.into_iter()
                .map(|(price, amount)| OrderBookLevel { price, amount })
                .collect()
        };
        OrderBook {
            symbol: native_symbol.to_string(),
            bids: levels(self.bids),
            asks: levels(self.asks),
            timestamp,
        }
    }
}

/// `GET /api/v3/exchangeInfo`
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
}

impl SymbolInfo {
    pub fn into_market(self) -> Market {
        Market {
            active: self.status == "TRADING",
            symbol: self.symbol,
            base: self.base_asset,
            quote: self.quote_asset,
        }
    }
}

/// Order placement (`newOrderRespType=FULL`), query and cancel responses
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: u64,
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub price: Option<Fixed>,
    pub orig_qty: Fixed,
    pub status: String,
    pub side: BinanceOrderSide,
    #[serde(default)]
    pub transact_time: Option<u64>,
    #[serde(default)]
    pub update_time: Option<u64>,
    #[serde(default)]
    pub fills: Vec<OrderFill>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFill {
    pub price: Fixed,
    pub qty: Fixed,
    pub commission: Fixed,
    pub commission_asset: String,
    pub trade_id: u64,
}

impl OrderResponse {
    pub fn into_snapshot(self) -> OrderSnapshot {
        let order_id = self.order_id.to_string();
        let side = OrderSide::from(self.side);
        let timestamp = self.transact_time.or(self.update_time).unwrap_or_default();
        let fills = self
            .fills
            .into_iter()
            .map(|fill| RawFill {
                order_id: order_id.clone(),
                trade_id: Some(fill.trade_id.to_string()),
                symbol: self.symbol.clone(),
                side,
                amount: fill.qty,
                price: fill.price,
                timestamp,
                fee: Some(fill.commission),
                fee_currency: Some(fill.commission_asset),
            })
            .collect();

        OrderSnapshot {
            order_id,
            client_order_id: self.client_order_id.filter(|id| !id.is_empty()),
            symbol: self.symbol,
            side,
            requested_amount: Some(self.orig_qty),
            // Market orders report a zero price
            price: self.price.filter(Fixed::is_positive),
            state: ExchangeOrderState::from_native(&self.status),
            fills,
            timestamp,
        }
    }
}

/// `GET /api/v3/myTrades`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTrade {
    pub symbol: String,
    pub id: u64,
    pub order_id: u64,
    pub price: Fixed,
    pub qty: Fixed,
    pub commission: Fixed,
    pub commission_asset: String,
    pub time: u64,
    pub is_buyer: bool,
}

impl AccountTrade {
    pub fn into_fill(self) -> RawFill {
        RawFill {
            order_id: self.order_id.to_string(),
            trade_id: Some(self.id.to_string()),
            symbol: self.symbol,
            side: if self.is_buyer { OrderSide::Buy } else { OrderSide::Sell },
            amount: self.qty,
            price: self.price,
            timestamp: self.time,
            fee: Some(self.commission),
            fee_currency: Some(self.commission_asset),
        }
    }
}

/// `<symbol>@ticker` stream payload
#[derive(Debug, Clone, Deserialize)]
pub struct TickerUpdate {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b")]
    pub bid: Fixed,
    #[serde(rename = "a")]
    pub ask: Fixed,
    #[serde(rename = "c")]
    pub last: Fixed,
    #[serde(rename = "v")]
    pub volume: Fixed,
}

impl TickerUpdate {
    pub fn into_ticker(self) -> Ticker {
        Ticker {
            symbol: self.symbol,
            bid: self.bid,
            ask: self.ask,
            last: self.last,
            volume: self.volume,
            timestamp: self.event_time,
        }
    }
}

/// `executionReport` user-data event
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionReport {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "S")]
    pub side: BinanceOrderSide,
    /// NEW, TRADE, CANCELED, EXPIRED, ...
    #[serde(rename = "x")]
    pub execution_type: String,
    #[serde(rename = "i")]
    pub order_id: u64,
    #[serde(rename = "l")]
    pub last_quantity: Fixed,
    #[serde(rename = "L")]
    pub last_price: Fixed,
    #[serde(rename = "n")]
    pub commission: Fixed,
    #[serde(rename = "N", default)]
    pub commission_asset: Option<String>,
    #[serde(rename = "T")]
    pub transaction_time: u64,
    #[serde(rename = "t")]
    pub trade_id: i64,
}

impl ExecutionReport {
    /// The execution this report carries, if it is a trade
    pub fn into_fill(self) -> Option<RawFill> {
        if self.execution_type != "TRADE" || !self.last_quantity.is_positive() {
            return None;
        }
        Some(RawFill {
            order_id: self.order_id.to_string(),
            trade_id: (self.trade_id >= 0).then(|| self.trade_id.to_string()),
            symbol: self.symbol,
            side: self.side.into(),
            amount: self.last_quantity,
            price: self.last_price,
            timestamp: self.transaction_time,
            fee: Some(self.commission),
            fee_currency: self.commission_asset,
        })
    }
}
