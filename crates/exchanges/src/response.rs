//! Exchange error-signalling conventions
//!
//! Exchanges report failures in many shapes: an HTTP status, a `success`
//! flag, an `error` field, a `status` that is not "ok", a non-zero `code`.
//! [`ResponseRules`] describes which of these one exchange uses, so the
//! pipeline can refuse to decode an error body as data.

use crate::errors::{ExchangeError, Result};
use crate::http::HttpResponse;
use serde_json::Value;

/// Declarative description of an exchange's response envelope
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRules {
    /// Boolean field that is `false` on failure
    pub success_field: Option<&'static str>,
    /// Field that is present and non-empty on failure
    pub error_field: Option<&'static str>,
    /// String field and the value it holds on success
    pub status_field: Option<(&'static str, &'static str)>,
    /// Numeric field and the values it holds on success
    pub code_field: Option<(&'static str, &'static [i64])>,
    /// Where to look for the human-readable message, first match wins
    pub message_fields: &'static [&'static str],
    /// Envelope holding the actual result on success
    pub result_field: Option<&'static str>,
}

impl Default for ResponseRules {
    fn default() -> Self {
        Self {
            success_field: Some("success"),
            error_field: Some("error"),
            status_field: None,
            code_field: None,
            message_fields: &["message", "msg", "err-msg", "error_description", "errorMessage"],
            result_field: None,
        }
    }
}

impl ResponseRules {
    /// Only the HTTP status is trusted
    pub fn status_only() -> Self {
        Self {
            success_field: None,
            error_field: None,
            ..Default::default()
        }
    }

    pub fn with_success_field(mut self, field: &'static str) -> Self {
        self.success_field = Some(field);
        self
    }

    pub fn with_error_field(mut self, field: &'static str) -> Self {
        self.error_field = Some(field);
        self
    }

    pub fn with_status_field(mut self, field: &'static str, ok_value: &'static str) -> Self {
        self.status_field = Some((field, ok_value));
        self
    }

    pub fn with_code_field(mut self, field: &'static str, success_codes: &'static [i64]) -> Self {
        self.code_field = Some((field, success_codes));
        self
    }

    pub fn with_message_fields(mut self, fields: &'static [&'static str]) -> Self {
        self.message_fields = fields;
        self
    }

    pub fn with_result_field(mut self, field: &'static str) -> Self {
        self.result_field = Some(field);
        self
    }

    /// Validate a raw response and unwrap its result
    ///
    /// `classify` turns `(http status, exchange code, message)` into an
    /// error; the message is passed through verbatim.
    pub fn validate<F>(&self, response: &HttpResponse, classify: F) -> Result<Value>
    where
        F: Fn(u16, Option<i64>, &str) -> ExchangeError,
    {
        let body = response.body.trim();
        let parsed = if body.is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str::<Value>(body)
        };

        if !response.is_success() {
            return Err(match &parsed {
                Ok(value) => match self.message(value) {
                    Some(message) => classify(response.status, self.code(value), &message),
                    None => classify(response.status, self.code(value), body),
                },
                Err(_) => classify(response.status, None, body),
            });
        }

        let value = parsed.map_err(|e| ExchangeError::Decode(format!("response body is not JSON: {e}")))?;
        if let Some(violation) = self.violation(&value) {
            return Err(classify(response.status, self.code(&value), &violation));
        }

        match self.result_field {
            Some(field) => match value {
                Value::Object(mut map) if map.contains_key(field) => Ok(map.remove(field).unwrap_or(Value::Null)),
                other => Ok(other),
            },
            None => Ok(value),
        }
    }

    /// The failure message if a 2xx body still signals an error
    fn violation(&self, value: &Value) -> Option<String> {
        let object = value.as_object()?;
        let fallback = |what: &str| self.message(value).unwrap_or_else(|| format!("{what}: {value}"));

        if let Some(field) = self.success_field {
            if object.get(field).and_then(Value::as_bool) == Some(false) {
                return Some(fallback("request unsuccessful"));
            }
        }
        if let Some(field) = self.error_field {
            if let Some(error) = object.get(field) {
                if let Some(message) = error_text(error) {
                    return Some(message);
                }
            }
        }
        if let Some((field, ok_value)) = self.status_field {
            if let Some(status) = object.get(field).and_then(Value::as_str) {
                if !status.eq_ignore_ascii_case(ok_value) {
                    return Some(self.message(value).unwrap_or_else(|| status.to_string()));
                }
            }
        }
        if let Some((field, success_codes)) = self.code_field {
            if let Some(code) = object.get(field).and_then(as_code) {
                if !success_codes.contains(&code) {
                    return Some(fallback("exchange code"));
                }
            }
        }
        None
    }

    fn message(&self, value: &Value) -> Option<String> {
        let object = value.as_object()?;
        self.message_fields
            .iter()
            .chain(self.error_field.iter())
            .filter_map(|field| object.get(*field))
            .find_map(error_text)
    }

    fn code(&self, value: &Value) -> Option<i64> {
        let object = value.as_object()?;
        let field = self.code_field.map(|(field, _)| field).unwrap_or("code");
        object.get(field).and_then(as_code)
    }
}

/// Text of an error-ish field, `None` when it signals "no error"
fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) if items.is_empty() => None,
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string()))
                .collect::<Vec<_>>()
                .join("; "),
        ),
        Value::Object(map) if map.is_empty() => None,
        other => Some(other.to_string()),
    }
}

fn as_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Default error classification when an adapter has no code table
///
/// Transport for 429 and 5xx, auth for 401/403 or messages about keys,
/// signatures and nonces, domain for everything else.
pub fn classify_by_message(status: u16, code: Option<i64>, message: &str) -> ExchangeError {
    if status == 429 || status >= 500 {
        return ExchangeError::Http {
            status,
            body: message.to_string(),
        };
    }
    if status == 401 || status == 403 {
        return ExchangeError::auth(code, message);
    }
    let lowered = message.to_ascii_lowercase();
    const AUTH_HINTS: [&str; 8] = [
        "signature",
        "api key",
        "api-key",
        "apikey",
        "invalid key",
        "nonce",
        "unauthorized",
        "permission denied",
    ];
    if AUTH_HINTS.iter().any(|hint| lowered.contains(hint)) {
        ExchangeError::auth(code, message)
    } else {
        ExchangeError::domain(code, message)
    }
}
