//! Order lifecycle on the Binance testnet
//!
//! Places a limit buy well below the market, reads it back, streams any
//! fills into a consolidated order and cancels it. Needs
//! `BINANCE_API_KEY` / `BINANCE_SECRET_KEY` for a testnet account, read
//! from the environment or a `.env` file.

use omniex_core::prelude::*;
use omniex_exchanges::binance;
use omniex_exchanges::prelude::*;
use omniex_exchanges::reconciler::fold;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const SYMBOL: &str = "BTC-USDT";

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let client = ExchangeRegistry::with_builtin()
        .create_with_config("binance", binance::testnet_config())?
        .with_env_credentials()?;
    info!("🔑 Credentials loaded for {}", client.name());

    let ticker = client.get_ticker_blocking(SYMBOL)?;
    // Half the bid never fills on a live book
    let price = ticker.bid.checked_div(Fixed::from_i64(2))?.round_dp(2);
    let request = OrderRequest::limit(SYMBOL, OrderSide::Buy, fixed_amount()?, price)
        .with_client_order_id(ClientOrderId::generate("omx").as_str());
    info!("📝 Placing {:?} {} {} @ {}", request.side, request.amount, SYMBOL, price);

    let placed = client.place_order_blocking(&request)?;
    info!("✅ Order {} is {:?}", placed.order_id, placed.status);

    let book = Arc::new(Mutex::new(Some(placed.clone())));
    let sink = Arc::clone(&book);
    let order_id = placed.order_id.clone();
    let fills = client.subscribe_fills_blocking(move |fill| {
        if fill.order_id != order_id {
            return;
        }
        let Ok(mut slot) = sink.lock() else { return };
        match fold(slot.take(), fill) {
            Ok(order) => {
                info!("⚡ Filled {} avg {} ({:?})", order.filled_amount, order.average_price, order.status);
                *slot = Some(order);
            }
            Err(e) => warn!("❌ Fill rejected: {}", e),
        }
    })?;

    let details = client.get_order_details_blocking(SYMBOL, &placed.order_id)?;
    info!(
        "🔍 Details: {:?}, filled {} of {:?}",
        details.status, details.filled_amount, details.requested_amount
    );

    let canceled = client.cancel_order_blocking(SYMBOL, &placed.order_id)?;
    info!("🛑 Cancel: {:?}", canceled.status);

    fills.dispose();
    if let Ok(slot) = book.lock() {
        if let Some(order) = slot.as_ref() {
            info!("🏁 Streamed view: {} fills, {:?}", order.fill_count, order.status);
        }
    }
    Ok(())
}

fn fixed_amount() -> anyhow::Result<Fixed> {
    Ok(Fixed::from_str_exact("0.001")?)
}
