//! Error taxonomy for the client layer
//!
//! Every failure carries a stable [`ErrorKind`] so callers can tell "retry
//! later" (`Transport`) from "fix the request" (`Auth`, `Domain`) from "not
//! available here" (`NotSupported`) without inspecting strings. Exchange
//! messages are kept verbatim.

use thiserror::Error;

/// Result type for exchange operations
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Stable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network failure or deadline; safe to retry
    Transport,
    /// Signature, nonce or key rejected; do not retry with the same nonce
    Auth,
    /// Business rejection reported by the exchange
    Domain,
    /// Internal invariant violated; points to a parsing or adapter bug
    Integrity,
    /// Operation not offered by this exchange
    NotSupported,
    /// Local setup problem: missing credentials, bad URL, duplicate registration
    Configuration,
}

/// Exchange operation errors
///
/// `Clone` so one single-flight failure can be handed to every waiter.
#[derive(Error, Debug, Clone)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Authentication rejected: {message}")]
    Auth { code: Option<i64>, message: String },

    #[error("Exchange error{}: {message}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
    Domain { code: Option<i64>, message: String },

    #[error("Unknown symbol on {exchange}: {symbol}")]
    UnknownSymbol { exchange: String, symbol: String },

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("{operation} is not supported by {exchange}")]
    NotSupported { exchange: String, operation: String },

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ExchangeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::Timeout(_) => ErrorKind::Transport,
            // 5xx and 429 are the exchange being unavailable or throttling us
            Self::Http { status, .. } if *status >= 500 || *status == 429 => ErrorKind::Transport,
            Self::Http { status, .. } if *status == 401 || *status == 403 => ErrorKind::Auth,
            Self::Http { .. } => ErrorKind::Domain,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::Domain { .. } | Self::UnknownSymbol { .. } => ErrorKind::Domain,
            Self::Integrity(_) | Self::Decode(_) => ErrorKind::Integrity,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::MissingCredentials(_) | Self::Signing(_) | Self::InvalidUrl(_) | Self::Configuration(_) => {
                ErrorKind::Configuration
            }
        }
    }

    /// Only transport failures are worth retrying unchanged
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// The exchange's own message, untranslated, when there is one
    pub fn exchange_message(&self) -> Option<&str> {
        match self {
            Self::Auth { message, .. } | Self::Domain { message, .. } => Some(message),
            Self::Http { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn exchange_code(&self) -> Option<i64> {
        match self {
            Self::Auth { code, .. } | Self::Domain { code, .. } => *code,
            _ => None,
        }
    }

    pub fn domain(code: Option<i64>, message: impl Into<String>) -> Self {
        Self::Domain {
            code,
            message: message.into(),
        }
    }

    pub fn auth(code: Option<i64>, message: impl Into<String>) -> Self {
        Self::Auth {
            code,
            message: message.into(),
        }
    }

    pub fn not_supported(exchange: &str, operation: &str) -> Self {
        Self::NotSupported {
            exchange: exchange.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn unknown_symbol(exchange: &str, symbol: &str) -> Self {
        Self::UnknownSymbol {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
        }
    }
}

impl From<omniex_core::FixedError> for ExchangeError {
    fn from(err: omniex_core::FixedError) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<url::ParseError> for ExchangeError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

/// Normalised exchange error codes, used by adapters to translate their
/// numeric codes before deciding between auth and domain errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unknown = 0,

    // Network codes (1000-1099)
    NetworkTimeout = 1001,
    ConnectionLost = 1002,

    // Authentication codes (1100-1199)
    InvalidApiKey = 1101,
    InvalidSignature = 1102,
    TimestampExpired = 1103,
    PermissionDenied = 1104,
    InvalidNonce = 1105,

    // Trading codes (1200-1299)
    InsufficientBalance = 1201,
    InvalidSymbol = 1202,
    InvalidQuantity = 1203,
    InvalidPrice = 1204,
    OrderNotFound = 1205,
    MarketClosed = 1206,

    // Rate limiting codes (1300-1399)
    RateLimitExceeded = 1301,

    // System codes (1400-1499)
    SystemMaintenance = 1401,
    SystemOverload = 1402,
}

impl ErrorCode {
    pub fn kind(&self) -> ErrorKind {
        match *self as u16 {
            1000..=1099 | 1300..=1499 => ErrorKind::Transport,
            1100..=1199 => ErrorKind::Auth,
            _ => ErrorKind::Domain,
        }
    }

    /// Build the matching error around the exchange's verbatim message
    pub fn into_error(self, raw_code: Option<i64>, message: impl Into<String>) -> ExchangeError {
        let message = message.into();
        match self.kind() {
            ErrorKind::Auth => ExchangeError::auth(raw_code, message),
            ErrorKind::Transport => match raw_code {
                Some(code) => ExchangeError::Network(format!("exchange code {code}: {message}")),
                None => ExchangeError::Network(message),
            },
            _ => ExchangeError::domain(raw_code, message),
        }
    }
}
