//! monoio runtime wrapper
//!
//! All network IO runs on monoio. `FusionDriver` picks io_uring when the
//! kernel supports it and falls back to epoll otherwise. Timers are always
//! enabled because rate-gate waits, request deadlines and reconnect backoff
//! all sleep.

use monoio::{FusionDriver, RuntimeBuilder};
use tracing::info;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Thread name used for dedicated connection threads
    pub thread_name: String,
    /// io_uring submission queue entries
    pub entries: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_name: "omniex-main".to_string(),
            entries: 256,
        }
    }
}

/// Builds timer-enabled monoio runtimes
#[derive(Debug, Clone, Default)]
pub struct ClientRuntime {
    config: RuntimeConfig,
}

impl ClientRuntime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Drive `future` to completion on a fresh runtime owned by this thread.
    ///
    /// Must not be called from inside another monoio runtime.
    pub fn block_on<F>(&self, future: F) -> std::io::Result<F::Output>
    where
        F: std::future::Future,
    {
        let mut runtime = RuntimeBuilder::<FusionDriver>::new()
            .with_entries(self.config.entries)
            .enable_timer()
            .build()?;
        Ok(runtime.block_on(future))
    }

    /// Run `f` on a named thread with its own runtime.
    pub fn spawn_thread<F, Fut>(&self, name: impl Into<String>, f: F) -> std::io::Result<std::thread::JoinHandle<()>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()>,
    {
        let name = name.into();
        let runtime = self.clone();
        std::thread::Builder::new().name(name.clone()).spawn(move || {
            info!("▶️  Runtime thread {} started", name);
            if let Err(e) = runtime.block_on(f()) {
                tracing::error!("❌ Runtime thread {} could not start: {}", name, e);
            }
            info!("⏹️  Runtime thread {} stopped", name);
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}
