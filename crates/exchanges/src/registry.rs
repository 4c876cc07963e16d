//! Name-keyed adapter registry
//!
//! Callers pick an exchange by name at run time; each entry knows how to
//! build its hooks from an [`ExchangeConfig`] and what that config defaults to.

use crate::client::ExchangeClient;
use crate::config::ExchangeConfig;
use crate::errors::{ExchangeError, Result};
use crate::http::HttpTransport;
use crate::traits::ExchangeHooks;
use crate::websocket::WsConnector;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub type HooksFactory = Arc<dyn Fn(&ExchangeConfig) -> Arc<dyn ExchangeHooks> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    factory: HooksFactory,
    default_config: ExchangeConfig,
}

#[derive(Clone, Default)]
pub struct ExchangeRegistry {
    entries: BTreeMap<String, Entry>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every adapter compiled into this crate
    pub fn with_builtin() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "binance")]
        {
            let result = registry.register("binance", crate::binance::default_config(), |config| {
                Arc::new(crate::binance::BinanceHooks::from_config(config))
            });
            if let Err(e) = result {
                tracing::error!("❌ Built-in adapter failed to register: {}", e);
            }
        }
        registry
    }

    /// Names are case-insensitive; registering one twice is an error
    pub fn register<F>(&mut self, name: &str, default_config: ExchangeConfig, factory: F) -> Result<()>
    where
        F: Fn(&ExchangeConfig) -> Arc<dyn ExchangeHooks> + Send + Sync + 'static,
    {
        let key = name.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(ExchangeError::Configuration("exchange name is empty".to_string()));
        }
        if self.entries.contains_key(&key) {
            return Err(ExchangeError::Configuration(format!("exchange {key} is already registered")));
        }
        self.entries.insert(
            key,
            Entry {
                factory: Arc::new(factory),
                default_config,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.trim().to_ascii_lowercase())
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn default_config(&self, name: &str) -> Result<ExchangeConfig> {
        Ok(self.entry(name)?.default_config.clone())
    }

    pub fn hooks(&self, name: &str, config: &ExchangeConfig) -> Result<Arc<dyn ExchangeHooks>> {
        Ok((self.entry(name)?.factory)(config))
    }

    /// Client on the live transports, with the adapter's default config
    pub fn create(&self, name: &str) -> Result<ExchangeClient> {
        let config = self.default_config(name)?;
        self.create_with_config(name, config)
    }

    pub fn create_with_config(&self, name: &str, config: ExchangeConfig) -> Result<ExchangeClient> {
        let hooks = self.hooks(name, &config)?;
        info!("🏭 Creating {} client for {}", hooks.name(), config.base_url);
        ExchangeClient::new(hooks, config)
    }

    /// Client on caller-supplied transports (tests, proxies, recorders)
    pub fn create_with_transports(
        &self,
        name: &str,
        config: ExchangeConfig,
        transport: Arc<dyn HttpTransport>,
        connector: Arc<dyn WsConnector>,
    ) -> Result<ExchangeClient> {
        let hooks = self.hooks(name, &config)?;
        ExchangeClient::with_transports(hooks, config, transport, connector)
    }

    fn entry(&self, name: &str) -> Result<&Entry> {
        self.entries
            .get(&name.trim().to_ascii_lowercase())
            .ok_or_else(|| ExchangeError::Configuration(format!("no adapter registered for exchange {name}")))
    }
}

impl std::fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRegistry").field("exchanges", &self.names()).finish()
    }
}
