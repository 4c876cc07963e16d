//! Exchange-native <-> canonical symbol mapping
//!
//! Canonical symbols are `BASE-QUOTE`, upper case ASCII alphanumerics on
//! both sides. Every normalizer fails closed: input it cannot map exactly
//! is an [`ExchangeError::UnknownSymbol`], never a best guess.

use crate::errors::{ExchangeError, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub const CANONICAL_SEPARATOR: char = '-';

/// Bidirectional symbol mapping for one exchange
pub trait SymbolNormalizer: Send + Sync {
    fn to_exchange(&self, canonical: &str) -> Result<String>;
    fn to_canonical(&self, native: &str) -> Result<String>;
}

/// Split a strictly canonical symbol into `(base, quote)`
pub fn split_canonical(symbol: &str) -> Option<(&str, &str)> {
    let (base, quote) = symbol.split_once(CANONICAL_SEPARATOR)?;
    if is_asset_code(base) && is_asset_code(quote) {
        Some((base, quote))
    } else {
        None
    }
}

pub fn canonical(base: &str, quote: &str) -> String {
    format!("{base}{CANONICAL_SEPARATOR}{quote}")
}

fn is_asset_code(code: &str) -> bool {
    !code.is_empty() && code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// String-transform mapping: separator substitution, case folding and
/// base/quote reordering
///
/// Without a separator the split point is recovered from `known_quotes`,
/// longest match first, and `to_exchange` refuses pairs whose native form
/// would not map back to the same canonical symbol.
#[derive(Debug, Clone)]
pub struct AlgorithmicNormalizer {
    exchange: String,
    separator: Option<String>,
    lowercase: bool,
    quote_first: bool,
    known_quotes: Vec<String>,
}

impl AlgorithmicNormalizer {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            separator: Some(CANONICAL_SEPARATOR.to_string()),
            lowercase: false,
            quote_first: false,
            known_quotes: Vec::new(),
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    /// Concatenated pairs (`BTCUSDT`), split using the known quote assets
    pub fn without_separator<I, S>(mut self, known_quotes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.separator = None;
        let mut quotes: Vec<String> = known_quotes
            .into_iter()
            .map(|q| q.as_ref().to_ascii_uppercase())
            .collect();
        quotes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        quotes.dedup();
        self.known_quotes = quotes;
        self
    }

    pub fn lowercase(mut self) -> Self {
        self.lowercase = true;
        self
    }

    /// Native form lists the quote asset first (`USD-BTC`)
    pub fn quote_first(mut self) -> Self {
        self.quote_first = true;
        self
    }

    fn unknown(&self, symbol: &str) -> ExchangeError {
        ExchangeError::unknown_symbol(&self.exchange, symbol)
    }

    fn order<'a>(&self, base: &'a str, quote: &'a str) -> (&'a str, &'a str) {
        if self.quote_first { (quote, base) } else { (base, quote) }
    }

    fn split_native<'a>(&self, native: &'a str) -> Option<(&'a str, &'a str)> {
        match &self.separator {
            Some(separator) => {
                let (first, second) = native.split_once(separator.as_str())?;
                // A second separator means the input is not a pair
                if second.contains(separator.as_str()) {
                    return None;
                }
                Some((first, second))
            }
            None => {
                if self.quote_first {
                    let quote = self.known_quotes.iter().find(|q| native.starts_with(q.as_str()))?;
                    Some((&native[..quote.len()], &native[quote.len()..]))
                } else {
                    let quote = self.known_quotes.iter().find(|q| native.ends_with(q.as_str()))?;
                    let split = native.len() - quote.len();
                    Some((&native[..split], &native[split..]))
                }
            }
        }
    }
}

impl SymbolNormalizer for AlgorithmicNormalizer {
    fn to_exchange(&self, canonical_symbol: &str) -> Result<String> {
        let (base, quote) = split_canonical(canonical_symbol).ok_or_else(|| self.unknown(canonical_symbol))?;
        let (first, second) = self.order(base, quote);
        let native = match &self.separator {
            Some(separator) => format!("{first}{separator}{second}"),
            None => format!("{first}{second}"),
        };
        let native = if self.lowercase { native.to_ascii_lowercase() } else { native };

        if self.separator.is_none() && self.to_canonical(&native).ok().as_deref() != Some(canonical_symbol) {
            return Err(self.unknown(canonical_symbol));
        }
        Ok(native)
    }

    fn to_canonical(&self, native: &str) -> Result<String> {
        let upper = native.trim().to_ascii_uppercase();
        let (first, second) = self.split_native(&upper).ok_or_else(|| self.unknown(native))?;
        let (base, quote) = self.order(first, second);
        if !is_asset_code(base) || !is_asset_code(quote) {
            return Err(self.unknown(native));
        }
        Ok(canonical(base, quote))
    }
}

/// Explicit lookup for exchanges whose spelling cannot be derived
///
/// Both directions are built from one list of `(native, canonical)` pairs;
/// a native or canonical symbol appearing twice is rejected at
/// construction. Build it once and share it (a `OnceLock` static or an
/// `Arc`); it is immutable afterwards.
#[derive(Debug, Clone)]
pub struct TableNormalizer {
    exchange: String,
    to_native: HashMap<String, String>,
    to_canonical: HashMap<String, String>,
    fallback: Option<AlgorithmicNormalizer>,
}

impl TableNormalizer {
    pub fn new<'a, I>(exchange: impl Into<String>, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let exchange = exchange.into();
        let mut to_native = HashMap::new();
        let mut to_canonical = HashMap::new();

        for (native, canonical_symbol) in pairs {
            if split_canonical(canonical_symbol).is_none() {
                return Err(ExchangeError::Configuration(format!(
                    "{exchange}: {canonical_symbol:?} is not a canonical BASE-QUOTE symbol"
                )));
            }
            let native_key = native.to_ascii_uppercase();
            if to_canonical.insert(native_key, canonical_symbol.to_string()).is_some() {
                return Err(ExchangeError::Configuration(format!(
                    "{exchange}: native symbol {native:?} mapped twice"
                )));
            }
            if to_native.insert(canonical_symbol.to_string(), native.to_string()).is_some() {
                return Err(ExchangeError::Configuration(format!(
                    "{exchange}: canonical symbol {canonical_symbol:?} mapped twice"
                )));
            }
        }

        Ok(Self {
            exchange,
            to_native,
            to_canonical,
            fallback: None,
        })
    }

    /// Derive symbols missing from the table algorithmically; derived
    /// results that collide with a table entry are still rejected
    pub fn with_fallback(mut self, fallback: AlgorithmicNormalizer) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn len(&self) -> usize {
        self.to_native.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_native.is_empty()
    }
}

impl SymbolNormalizer for TableNormalizer {
    fn to_exchange(&self, canonical_symbol: &str) -> Result<String> {
        if let Some(native) = self.to_native.get(canonical_symbol) {
            return Ok(native.clone());
        }
        let fallback = self
            .fallback
            .as_ref()
            .ok_or_else(|| ExchangeError::unknown_symbol(&self.exchange, canonical_symbol))?;
        let native = fallback.to_exchange(canonical_symbol)?;
        if self.to_canonical.contains_key(&native.to_ascii_uppercase()) {
            return Err(ExchangeError::unknown_symbol(&self.exchange, canonical_symbol));
        }
        Ok(native)
    }

    fn to_canonical(&self, native: &str) -> Result<String> {
        if let Some(canonical_symbol) = self.to_canonical.get(&native.trim().to_ascii_uppercase()) {
            return Ok(canonical_symbol.clone());
        }
        let fallback = self
            .fallback
            .as_ref()
            .ok_or_else(|| ExchangeError::unknown_symbol(&self.exchange, native))?;
        let canonical_symbol = fallback.to_canonical(native)?;
        if self.to_native.contains_key(&canonical_symbol) {
            return Err(ExchangeError::unknown_symbol(&self.exchange, native));
        }
        Ok(canonical_symbol)
    }
}

/// The symbol strategy an adapter selects
#[derive(Debug, Clone)]
pub enum SymbolRules {
    Algorithmic(AlgorithmicNormalizer),
    Table(Arc<TableNormalizer>),
}

impl SymbolNormalizer for SymbolRules {
    fn to_exchange(&self, canonical_symbol: &str) -> Result<String> {
        match self {
            SymbolRules::Algorithmic(n) => n.to_exchange(canonical_symbol),
            SymbolRules::Table(n) => n.to_exchange(canonical_symbol),
        }
    }

    fn to_canonical(&self, native: &str) -> Result<String> {
        match self {
            SymbolRules::Algorithmic(n) => n.to_canonical(native),
            SymbolRules::Table(n) => n.to_canonical(native),
        }
    }
}

impl From<AlgorithmicNormalizer> for SymbolRules {
    fn from(normalizer: AlgorithmicNormalizer) -> Self {
        SymbolRules::Algorithmic(normalizer)
    }
}

impl From<TableNormalizer> for SymbolRules {
    fn from(normalizer: TableNormalizer) -> Self {
        SymbolRules::Table(Arc::new(normalizer))
    }
}
