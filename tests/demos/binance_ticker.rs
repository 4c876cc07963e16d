//! Live Binance market data through the unified client
//!
//! Demonstrates:
//! - Registry lookup by exchange name
//! - Blocking REST reads (ticker, book, markets)
//! - Two ticker streams multiplexed on one socket
//!
//! Public endpoints only; no credentials required. Set
//! `OMNIEX_TESTNET=false` to use production endpoints.

use omniex_core::prelude::*;
use omniex_exchanges::binance;
use omniex_exchanges::prelude::*;
use std::time::Duration;
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let testnet = std::env::var("OMNIEX_TESTNET").map(|v| v != "false").unwrap_or(true);
    let config = if testnet { binance::testnet_config() } else { binance::default_config() };
    info!("🚀 Binance ticker demo against {}", config.base_url);

    let client = ExchangeRegistry::with_builtin().create_with_config("binance", config)?;

    let timer = PerfTimer::start("ticker_rest");
    let ticker = client.get_ticker_blocking("BTC-USDT")?;
    info!(
        "📈 {} bid {} ask {} last {} ({}μs)",
        ticker.symbol,
        ticker.bid,
        ticker.ask,
        ticker.last,
        timer.elapsed_micros()
    );

    let book = client.get_order_book_blocking("ETH-USDT", Some(5))?;
    if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
        info!("📚 {} top of book {} @ {} / {} @ {}", book.symbol, bid.amount, bid.price, ask.amount, ask.price);
    }

    let markets = client.get_market_symbols_blocking()?;
    let active = markets.iter().filter(|m| m.active).count();
    info!("🗂️ {} markets, {} active", markets.len(), active);

    let (tx, updates) = flume::unbounded();
    let mut handles = Vec::new();
    for symbol in ["BTC-USDT", "ETH-USDT"] {
        let tx = tx.clone();
        handles.push(client.subscribe_ticker(symbol, move |ticker| {
            let _ = tx.send(ticker);
        })?);
    }

    for _ in 0..10 {
        match updates.recv_timeout(Duration::from_secs(15)) {
            Ok(ticker) => info!("⚡ {} last {} vol {}", ticker.symbol, ticker.last, ticker.volume),
            Err(_) => {
                warn!("⏰ No ticker update within 15s");
                break;
            }
        }
    }

    if let Some(health) = client.streams().health(handles[0].endpoint()) {
        info!(
            "🔌 {} messages, {} reconnects, {} parse errors",
            health.message_count, health.reconnect_count, health.parse_error_count
        );
    }

    for handle in &handles {
        handle.dispose();
    }
    info!("✅ Done");
    Ok(())
}
