//! # Omniex Exchange Layer
//!
//! One client core for many crypto exchanges. Everything that differs
//! between exchanges lives behind [`ExchangeHooks`]; everything else is
//! written once:
//!
//! - **Request pipeline** - rate gate, nonce, URL, signing, transport,
//!   response validation, in that order
//! - **Response cache** - TTL cache with single-flight coalescing for
//!   public metadata
//! - **Connection manager** - one socket per endpoint, multiplexed
//!   subscriptions, reconnect with backoff and replay
//! - **Symbol normalization** - canonical `BASE-QUOTE` at the boundary,
//!   failing closed on unknown symbols
//! - **Order reconciliation** - partial fills folded into one consolidated
//!   order with a VWAP price

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod errors;
pub mod http;
pub mod pipeline;
pub mod protocol;
pub mod rate_gate;
pub mod reconciler;
pub mod registry;
pub mod response;
pub mod symbols;
pub mod traits;
pub mod types;
pub mod websocket;

#[cfg(feature = "binance")]
pub mod binance;

pub use auth::Credentials;
pub use cache::{CacheKey, CacheStats, ResponseCache};
pub use client::ExchangeClient;
pub use config::{ExchangeConfig, RateLimit, ReconnectConfig};
pub use connection::{ConnectionHealth, ConnectionManager, ConnectionState, Subscription, SubscriptionHandle};
pub use errors::{ErrorCode, ErrorKind, ExchangeError, Result};
pub use http::{HttpRequest, HttpResponse, HttpTransport, Method, MonoioHttpsClient};
pub use pipeline::{ApiRequest, Payload, RequestPipeline, Security};
pub use protocol::{Channel, Envelope, JsonProtocol, StreamProtocol};
pub use rate_gate::RateGate;
pub use reconciler::{ConsolidatedOrder, ExchangeOrderState, OrderResultStatus, RawFill};
pub use registry::ExchangeRegistry;
pub use response::ResponseRules;
pub use symbols::{AlgorithmicNormalizer, SymbolNormalizer, SymbolRules, TableNormalizer};
pub use traits::{Capabilities, ExchangeHooks, Operation, StreamSpec};
pub use types::*;
pub use websocket::{MonoioConnector, WsConnector, WsMessage, WsReader, WsSession, WsWriter};

#[cfg(feature = "binance")]
pub use binance::BinanceHooks;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::auth::Credentials;
    pub use crate::client::ExchangeClient;
    pub use crate::config::ExchangeConfig;
    pub use crate::connection::SubscriptionHandle;
    pub use crate::errors::{ErrorKind, ExchangeError, Result};
    pub use crate::reconciler::{ConsolidatedOrder, OrderResultStatus, RawFill};
    pub use crate::registry::ExchangeRegistry;
    pub use crate::symbols::SymbolNormalizer;
    pub use crate::traits::{Capabilities, ExchangeHooks};
    pub use crate::types::*;
    pub use omniex_core::prelude::*;
}
