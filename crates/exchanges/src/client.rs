//! Caller-facing exchange client
//!
//! Every logical operation takes and returns canonical symbols. Native
//! spellings exist only between this facade and the adapter hooks.
//! Operations the adapter does not offer fail with `NotSupported` before any
//! network traffic. Each async operation has a `_blocking` twin that drives
//! it on a private runtime.

use crate::auth::Credentials;
use crate::config::ExchangeConfig;
use crate::connection::{ConnectionManager, Subscription, SubscriptionHandle};
use crate::errors::{ExchangeError, Result};
use crate::http::{HttpTransport, MonoioHttpsClient};
use crate::pipeline::{ApiRequest, RequestPipeline};
use crate::reconciler::{ConsolidatedOrder, RawFill};
use crate::symbols::{SymbolNormalizer, SymbolRules};
use crate::traits::{Capabilities, ExchangeHooks, Operation, StreamSpec};
use crate::types::{Market, OrderBook, OrderRequest, OrderSnapshot, Ticker};
use crate::websocket::{MonoioConnector, WsConnector};
use omniex_core::{log_fill, log_order, ClientRuntime, NonceGenerator};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_BOOK_DEPTH: u32 = 100;

pub struct ExchangeClient {
    hooks: Arc<dyn ExchangeHooks>,
    pipeline: RequestPipeline,
    streams: ConnectionManager,
    symbols: SymbolRules,
    runtime: ClientRuntime,
}

impl ExchangeClient {
    /// Client on the live monoio HTTPS and WebSocket transports
    pub fn new(hooks: Arc<dyn ExchangeHooks>, config: ExchangeConfig) -> Result<Self> {
        Self::with_transports(hooks, config, Arc::new(MonoioHttpsClient::new()), Arc::new(MonoioConnector))
    }

    pub fn with_transports(
        hooks: Arc<dyn ExchangeHooks>,
        config: ExchangeConfig,
        transport: Arc<dyn HttpTransport>,
        connector: Arc<dyn WsConnector>,
    ) -> Result<Self> {
        config.validate()?;
        let streams = ConnectionManager::new(connector, hooks.stream_protocol(), config.reconnect.clone());
        let symbols = hooks.symbol_rules();
        let pipeline = RequestPipeline::new(Arc::clone(&hooks), transport, config);

        Ok(Self {
            hooks,
            pipeline,
            streams,
            symbols,
            runtime: ClientRuntime::new(),
        })
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.pipeline = self.pipeline.with_credentials(credentials);
        self
    }

    /// Load credentials from `{PREFIX}_API_KEY` and friends, with the prefix
    /// derived from the exchange name
    pub fn with_env_credentials(self) -> Result<Self> {
        let credentials = self.pipeline.config().credentials_from_env()?;
        Ok(self.with_credentials(credentials))
    }

    pub fn with_nonce_generator(mut self, nonces: Arc<NonceGenerator>) -> Self {
        self.pipeline = self.pipeline.with_nonce_generator(nonces);
        self
    }

    pub fn with_runtime(mut self, runtime: ClientRuntime) -> Self {
        self.streams = self.streams.with_runtime(runtime.clone());
        self.runtime = runtime;
        self
    }

    pub fn name(&self) -> &str {
        self.hooks.name()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.hooks.capabilities()
    }

    pub fn config(&self) -> &ExchangeConfig {
        self.pipeline.config()
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn streams(&self) -> &ConnectionManager {
        &self.streams
    }

    pub fn symbols(&self) -> &SymbolRules {
        &self.symbols
    }

    pub async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.ensure(Operation::Ticker)?;
        let native = self.symbols.to_exchange(symbol)?;
        let value = self.pipeline.execute_value(self.hooks.ticker_request(&native)?).await?;
        let mut ticker = self.hooks.parse_ticker(&native, &value)?;
        ticker.symbol = symbol.to_string();
        Ok(ticker)
    }

    pub async fn get_order_book(&self, symbol: &str, depth: Option<u32>) -> Result<OrderBook> {
        self.ensure(Operation::OrderBook)?;
        let native = self.symbols.to_exchange(symbol)?;
        let request = self
            .hooks
            .order_book_request(&native, depth.unwrap_or(DEFAULT_BOOK_DEPTH))?;
        let value = self.pipeline.execute_value(request).await?;
        let mut book = self.hooks.parse_order_book(&native, &value)?;
        book.symbol = symbol.to_string();
        book.sort();
        Ok(book)
    }

    /// Listed markets in canonical form, cached for the configured metadata
    /// TTL. Markets whose symbol cannot be mapped are left out.
    pub async fn get_market_symbols(&self) -> Result<Vec<Market>> {
        self.ensure(Operation::Markets)?;
        let mut request = self.hooks.markets_request()?;
        if request.cache_ttl.is_none() {
            request = request.cached(self.config().metadata_ttl());
        }
        let value = self.pipeline.execute_value(request).await?;

        let markets = self.hooks.parse_markets(&value)?;
        let total = markets.len();
        let canonical: Vec<Market> = markets
            .into_iter()
            .filter_map(|mut market| match self.symbols.to_canonical(&market.symbol) {
                Ok(symbol) => {
                    market.symbol = symbol;
                    Some(market)
                }
                Err(_) => {
                    debug!("🙈 {} market {} has no canonical form, skipping", self.name(), market.symbol);
                    None
                }
            })
            .collect();
        debug!("📚 {} lists {} markets ({} mapped)", self.name(), total, canonical.len());
        Ok(canonical)
    }

    pub async fn place_order(&self, order: &OrderRequest) -> Result<ConsolidatedOrder> {
        self.ensure(Operation::PlaceOrder)?;
        order.validate()?;
        let native = self.symbols.to_exchange(&order.symbol)?;
        let value = self
            .pipeline
            .execute_value(self.hooks.place_order_request(&native, order)?)
            .await?;

        let mut snapshot = self.canonical_snapshot(self.hooks.parse_order(&value)?)?;
        snapshot.requested_amount = snapshot.requested_amount.or(Some(order.amount));
        let consolidated = ConsolidatedOrder::from_snapshot(&snapshot)?;
        log_order!("placed", consolidated.order_id, consolidated.symbol);
        Ok(consolidated)
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<ConsolidatedOrder> {
        self.ensure(Operation::CancelOrder)?;
        let native = self.symbols.to_exchange(symbol)?;
        let value = self
            .pipeline
            .execute_value(self.hooks.cancel_order_request(&native, order_id)?)
            .await?;

        let snapshot = self.canonical_snapshot(self.hooks.parse_order(&value)?)?;
        let consolidated = ConsolidatedOrder::from_snapshot(&snapshot)?;
        log_order!("canceled", consolidated.order_id, consolidated.symbol);
        Ok(consolidated)
    }

    /// Current state of one order with its executions folded in
    pub async fn get_order_details(&self, symbol: &str, order_id: &str) -> Result<ConsolidatedOrder> {
        self.ensure(Operation::OrderDetails)?;
        let native = self.symbols.to_exchange(symbol)?;
        let value = self
            .pipeline
            .execute_value(self.hooks.order_details_request(&native, order_id)?)
            .await?;
        let snapshot = self.canonical_snapshot(self.hooks.parse_order(&value)?)?;
        let mut consolidated = ConsolidatedOrder::from_snapshot(&snapshot)?;

        if let Some(request) = self.hooks.order_fills_request(&native, order_id)? {
            let fills = self.hooks.parse_fills(&self.pipeline.execute_value(request).await?)?;
            for fill in fills {
                if fill.order_id != consolidated.order_id {
                    continue;
                }
                consolidated.apply(&self.canonical_fill(fill)?)?;
            }
        }
        Ok(consolidated)
    }

    /// Stream ticker updates for `symbol` to `on_ticker`
    ///
    /// Callable from sync and async code alike; the socket runs on its own
    /// thread. Frames that fail to parse are logged and skipped.
    pub fn subscribe_ticker<F>(&self, symbol: &str, on_ticker: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Ticker) + Send + Sync + 'static,
    {
        self.ensure(Operation::TickerStream)?;
        let native = self.symbols.to_exchange(symbol)?;
        let spec = self.hooks.ticker_stream(&native)?;

        let hooks = Arc::clone(&self.hooks);
        let canonical = symbol.to_string();
        let on_message = move |payload: &Value| match hooks.parse_ticker_update(&native, payload) {
            Ok(mut ticker) => {
                ticker.symbol = canonical.clone();
                on_ticker(ticker);
            }
            Err(e) => warn!("⚠️ Skipping {} ticker frame: {}", hooks.name(), e),
        };
        self.open_stream(spec, on_message)
    }

    /// Stream this account's executions, one [`RawFill`] per trade, with
    /// canonical symbols; fold them with [`crate::reconciler::fold`]
    pub async fn subscribe_fills<F>(&self, on_fill: F) -> Result<SubscriptionHandle>
    where
        F: Fn(RawFill) + Send + Sync + 'static,
    {
        self.ensure(Operation::FillsStream)?;
        if self.pipeline.credentials().is_none() {
            return Err(ExchangeError::MissingCredentials(format!("{} fills stream", self.name())));
        }
        let token = match self.hooks.fills_stream_token_request() {
            Some(request) => Some(self.pipeline.execute_value(request).await?),
            None => None,
        };
        let spec = self.hooks.fills_stream(token.as_ref())?;

        let hooks = Arc::clone(&self.hooks);
        let symbols = self.symbols.clone();
        let on_message = move |payload: &Value| {
            let fills = match hooks.parse_fill_update(payload) {
                Ok(fills) => fills,
                Err(e) => {
                    warn!("⚠️ Skipping {} user-data frame: {}", hooks.name(), e);
                    return;
                }
            };
            for mut fill in fills {
                match symbols.to_canonical(&fill.symbol) {
                    Ok(symbol) => {
                        fill.symbol = symbol;
                        log_fill!(fill.order_id, fill.side, fill.symbol, fill.amount, fill.price);
                        on_fill(fill);
                    }
                    Err(e) => warn!("⚠️ Dropping fill {:?}: {}", fill.trade_id, e),
                }
            }
        };
        let handle = self.open_stream(spec, on_message)?;

        let keepalive = token
            .as_ref()
            .and_then(|token| self.hooks.fills_stream_keepalive_request(token));
        if let Some(request) = keepalive {
            self.keep_alive(request, &handle)?;
        }
        Ok(handle)
    }

    pub fn get_ticker_blocking(&self, symbol: &str) -> Result<Ticker> {
        self.block(self.get_ticker(symbol))
    }

    pub fn get_order_book_blocking(&self, symbol: &str, depth: Option<u32>) -> Result<OrderBook> {
        self.block(self.get_order_book(symbol, depth))
    }

    pub fn get_market_symbols_blocking(&self) -> Result<Vec<Market>> {
        self.block(self.get_market_symbols())
    }

    pub fn place_order_blocking(&self, order: &OrderRequest) -> Result<ConsolidatedOrder> {
        self.block(self.place_order(order))
    }

    pub fn cancel_order_blocking(&self, symbol: &str, order_id: &str) -> Result<ConsolidatedOrder> {
        self.block(self.cancel_order(symbol, order_id))
    }

    pub fn get_order_details_blocking(&self, symbol: &str, order_id: &str) -> Result<ConsolidatedOrder> {
        self.block(self.get_order_details(symbol, order_id))
    }

    pub fn subscribe_fills_blocking<F>(&self, on_fill: F) -> Result<SubscriptionHandle>
    where
        F: Fn(RawFill) + Send + Sync + 'static,
    {
        self.block(self.subscribe_fills(on_fill))
    }

    fn ensure(&self, operation: Operation) -> Result<()> {
        if self.hooks.capabilities().supports(operation) {
            Ok(())
        } else {
            Err(ExchangeError::not_supported(self.name(), operation.as_str()))
        }
    }

    // Must not be called from inside a monoio runtime
    fn block<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
        self.runtime
            .block_on(future)
            .map_err(|e| ExchangeError::Configuration(format!("could not start runtime: {e}")))?
    }

    fn open_stream<F>(&self, spec: StreamSpec, on_message: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let hooks = Arc::clone(&self.hooks);
        let credentials = self.pipeline.credentials().cloned();
        let nonces = Arc::clone(self.pipeline.nonces());
        let StreamSpec {
            endpoint,
            stream_key,
            subscribe_frames,
            unsubscribe_frames,
            authenticated,
        } = spec;

        let subscription = Subscription::new(stream_key, on_message)
            .on_connect(move |sender| {
                if authenticated {
                    let credentials = credentials
                        .as_ref()
                        .ok_or_else(|| ExchangeError::MissingCredentials(format!("{} stream login", hooks.name())))?;
                    if let Some(frame) = hooks.ws_auth_frame(credentials, &nonces.next())? {
                        sender.send_text(frame);
                    }
                }
                for frame in &subscribe_frames {
                    sender.send_text(frame.clone());
                }
                Ok(())
            })
            .unsubscribe_frames(unsubscribe_frames);
        self.streams.subscribe(&endpoint, subscription)
    }

    /// Repeat `request` every `stream_keepalive_ms` until `handle` is disposed
    fn keep_alive(&self, request: ApiRequest, handle: &SubscriptionHandle) -> Result<()> {
        let (stop, stopped) = flume::bounded::<()>(1);
        let pipeline = self.pipeline.clone();
        let every = self.config().stream_keepalive();

        self.runtime
            .spawn_thread(format!("omniex-keepalive-{}", handle.id()), move || async move {
                let name = pipeline.hooks().name().to_string();
                // Any wakeup from the channel means the subscription is gone
                while monoio::time::timeout(every, stopped.recv_async()).await.is_err() {
                    match pipeline.execute_value(request.clone()).await {
                        Ok(_) => debug!("🔑 {} fills stream token refreshed", name),
                        Err(e) => warn!("⚠️ {} fills stream keepalive failed: {}", name, e),
                    }
                }
            })
            .map_err(|e| ExchangeError::Network(format!("could not start keepalive thread: {e}")))?;
        handle.attach(stop);
        Ok(())
    }

    fn canonical_snapshot(&self, mut snapshot: OrderSnapshot) -> Result<OrderSnapshot> {
        snapshot.symbol = self.symbols.to_canonical(&snapshot.symbol)?;
        snapshot.fills = snapshot
            .fills
            .into_iter()
            .map(|fill| self.canonical_fill(fill))
            .collect::<Result<_>>()?;
        Ok(snapshot)
    }

    fn canonical_fill(&self, mut fill: RawFill) -> Result<RawFill> {
        fill.symbol = self.symbols.to_canonical(&fill.symbol)?;
        Ok(fill)
    }
}

impl std::fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("exchange", &self.name())
            .field("pipeline", &self.pipeline)
            .field("streams", &self.streams)
            .finish()
    }
}
