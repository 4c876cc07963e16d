//! Logging setup
//!
//! Library code only emits `tracing` events. Binaries and tests call
//! [`init_logging`] once to install a subscriber: ftlog's asynchronous
//! writer when the `ftlog` feature is enabled, otherwise a `tracing-subscriber`
//! fmt layer filtered by `RUST_LOG` (default `info`).

#[cfg(not(feature = "ftlog"))]
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use std::sync::Once;

static INIT: Once = Once::new();

/// Install the global subscriber. Safe to call more than once.
pub fn init_logging() {
    INIT.call_once(|| {
        #[cfg(feature = "ftlog")]
        {
            init_ftlog();
        }

        #[cfg(not(feature = "ftlog"))]
        {
            init_tracing();
        }
    });
}

#[cfg(feature = "ftlog")]
fn init_ftlog() {
    let logger = ftlog::builder()
        .max_log_level(ftlog::LevelFilter::Debug)
        .bounded(100_000, false)
        .utc()
        .build();

    match logger.map(|logger| logger.init()) {
        Ok(Ok(guard)) => {
            // The guard flushes on drop; logging lives for the whole process.
            std::mem::forget(guard);
            tracing::info!("📝 Initialized ftlog logging");
        }
        Ok(Err(e)) => eprintln!("ftlog already installed: {e}"),
        Err(e) => eprintln!("ftlog could not start: {e}"),
    }
}

#[cfg(not(feature = "ftlog"))]
fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    // Tests in the same binary may have installed one already
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        tracing::info!("📝 Initialized tracing logging");
    }
}

#[macro_export]
macro_rules! log_fill {
    ($order_id:expr, $side:expr, $symbol:expr, $amount:expr, $price:expr) => {
        tracing::info!("💰 FILL {}: {} {} {} @ {}", $order_id, $side, $symbol, $amount, $price);
    };
}

#[macro_export]
macro_rules! log_order {
    ($action:expr, $order_id:expr, $symbol:expr) => {
        tracing::info!("📋 ORDER {}: {} ({})", $action, $order_id, $symbol);
    };
}
