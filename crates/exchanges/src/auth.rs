//! Credentials and request-signing primitives
//!
//! Adapters compose their `sign` hook from these helpers. Key material stays
//! inside [`ProtectedSecret`] and is only unmasked for the duration of one
//! MAC computation.

use crate::errors::{ExchangeError, Result};
use base64::Engine;
use hmac::{Hmac, Mac};
use omniex_core::ProtectedSecret;
use serde_json::Value;
use sha2::{Sha256, Sha512};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// API key material for one exchange connection
#[derive(Clone)]
pub struct Credentials {
    public_key: ProtectedSecret,
    private_key: ProtectedSecret,
    passphrase: Option<ProtectedSecret>,
}

impl Credentials {
    pub fn new(public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            public_key: ProtectedSecret::new(public_key),
            private_key: ProtectedSecret::new(private_key),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(ProtectedSecret::new(passphrase));
        self
    }

    /// Read `{PREFIX}_API_KEY`, `{PREFIX}_SECRET_KEY` and the optional
    /// `{PREFIX}_PASSPHRASE`
    pub fn from_env(prefix: &str) -> Result<Self> {
        let prefix = prefix.to_ascii_uppercase();
        let read = |suffix: &str| {
            let name = format!("{prefix}_{suffix}");
            std::env::var(&name).map_err(|_| ExchangeError::MissingCredentials(name))
        };

        let credentials = Self::new(read("API_KEY")?, read("SECRET_KEY")?);
        Ok(match read("PASSPHRASE") {
            Ok(passphrase) => credentials.with_passphrase(passphrase),
            Err(_) => credentials,
        })
    }

    pub fn is_valid(&self) -> bool {
        !self.public_key.is_empty() && !self.private_key.is_empty()
    }

    /// The API key, for headers such as `X-MBX-APIKEY`
    pub fn public_key(&self) -> String {
        self.public_key.expose(str::to_string)
    }

    pub fn passphrase(&self) -> Option<String> {
        self.passphrase.as_ref().map(|p| p.expose(str::to_string))
    }

    pub fn hmac_sha256(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.private_key.expose_bytes(|key| hmac_sha256(key, message))
    }

    pub fn hmac_sha512(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.private_key.expose_bytes(|key| hmac_sha512(key, message))
    }

    /// HMAC with a private key that is itself base64 text (Kraken, Coinbase style)
    pub fn hmac_sha512_b64_key(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.private_key.expose(|key| {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(key)
                .map_err(|e| ExchangeError::Signing(format!("private key is not base64: {e}")))?;
            hmac_sha512(&decoded, message)
        })
    }

    pub fn hmac_sha256_b64_key(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.private_key.expose(|key| {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(key)
                .map_err(|e| ExchangeError::Signing(format!("private key is not base64: {e}")))?;
            hmac_sha256(&decoded, message)
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("public_key", &"[REDACTED]")
            .field("private_key", &"[REDACTED]")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ExchangeError::Signing(format!("HMAC setup failed: {e}")))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn hmac_sha512(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha512::new_from_slice(key)
        .map_err(|e| ExchangeError::Signing(format!("HMAC setup failed: {e}")))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn sha256(data: &[u8]) -> Vec<u8> {
    use sha2::Digest;
    Sha256::digest(data).to_vec()
}

pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn to_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Render a JSON scalar the way exchanges expect it in a query string
pub fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `k=v&k=v` in the payload's own order, values percent-encoded
pub fn build_query_string<'a>(params: impl IntoIterator<Item = (&'a str, &'a Value)>) -> String {
    params
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(&query_value(v))))
        .collect::<Vec<_>>()
        .join("&")
}

/// Same as [`build_query_string`] but sorted by key, for exchanges that sign
/// a canonical ordering
pub fn build_sorted_query_string<'a>(params: impl IntoIterator<Item = (&'a str, &'a Value)>) -> String {
    let mut pairs: Vec<_> = params.into_iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    build_query_string(pairs)
}
