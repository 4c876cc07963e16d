//! Inbound stream envelope parsing
//!
//! Turns one text frame into an [`Envelope`] that tells the connection
//! manager where the payload belongs. Routing is by logical stream key
//! when the exchange echoes it, or by a server-assigned id the manager
//! learns from subscription acknowledgements.

use crate::errors::{ExchangeError, Result};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Channel {
    /// The logical stream key the subscription registered with
    Stream(String),
    /// An exchange-assigned id (numeric channel ids and the like)
    ServerId(String),
    /// No routing information; delivered to every subscription on the socket
    Broadcast,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Data { channel: Channel, payload: Value },
    /// The exchange assigned `server_id` to the stream `stream_key`
    Subscribed { stream_key: String, server_id: String },
    Unsubscribed { server_id: String },
    /// Acks, pongs and heartbeats; nothing to dispatch
    Control,
    Error { message: String },
}

/// Exchange-specific envelope parser, shared by every socket of one adapter
pub trait StreamProtocol: Send + Sync {
    fn parse(&self, text: &str) -> Result<Envelope>;
}

/// Field-driven parser covering the common JSON envelope shapes
///
/// * `{"stream": "<key>", "data": {...}}` (combined streams)
/// * `{"event": "subscribed", "chanId": 7, "channel": "ticker", "symbol": "tBTCUSD"}`
///   followed by `[7, ...]` arrays
/// * `{"event": "error", "msg": "..."}`
#[derive(Debug, Clone)]
pub struct JsonProtocol {
    stream_field: Option<String>,
    data_field: Option<String>,
    event_field: Option<String>,
    server_id_field: Option<String>,
    subscribed_key_fields: Vec<String>,
    array_channels: bool,
    broadcast_unrouted: bool,
    control_events: Vec<String>,
}

impl Default for JsonProtocol {
    fn default() -> Self {
        Self {
            stream_field: Some("stream".to_string()),
            data_field: Some("data".to_string()),
            event_field: Some("event".to_string()),
            server_id_field: None,
            subscribed_key_fields: Vec::new(),
            array_channels: false,
            broadcast_unrouted: false,
            control_events: vec![
                "pong".to_string(),
                "heartbeat".to_string(),
                "info".to_string(),
                "subscribe".to_string(),
                "unsubscribe".to_string(),
            ],
        }
    }
}

impl JsonProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream_field(mut self, stream_field: &str, data_field: Option<&str>) -> Self {
        self.stream_field = Some(stream_field.to_string());
        self.data_field = data_field.map(str::to_string);
        self
    }

    /// Learn channel ids from `subscribed` events; the stream key is the
    /// listed fields joined with `:`
    pub fn with_server_ids(mut self, id_field: &str, key_fields: &[&str]) -> Self {
        self.server_id_field = Some(id_field.to_string());
        self.subscribed_key_fields = key_fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Data frames shaped `[channel_id, payload...]`
    pub fn with_array_channels(mut self) -> Self {
        self.array_channels = true;
        self
    }

    /// Deliver frames without routing fields to every subscription
    pub fn broadcast_unrouted(mut self) -> Self {
        self.broadcast_unrouted = true;
        self
    }

    fn parse_array(&self, items: Vec<Value>) -> Result<Envelope> {
        let mut items = items.into_iter();
        let id = match items.next() {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s,
            _ => return Err(ExchangeError::Decode("array frame without channel id".to_string())),
        };
        let rest: Vec<Value> = items.collect();
        // Bitfinex-style heartbeats: [id, "hb"]
        if matches!(rest.as_slice(), [Value::String(s)] if s == "hb") {
            return Ok(Envelope::Control);
        }
        let payload = match rest.len() {
            0 => Value::Null,
            1 => rest.into_iter().next().unwrap_or(Value::Null),
            _ => Value::Array(rest),
        };
        Ok(Envelope::Data {
            channel: Channel::ServerId(id),
            payload,
        })
    }

    fn parse_event(&self, event: &str, object: &serde_json::Map<String, Value>) -> Result<Option<Envelope>> {
        match event {
            "subscribed" => {
                let Some(id_field) = &self.server_id_field else {
                    return Ok(Some(Envelope::Control));
                };
                let server_id = object
                    .get(id_field)
                    .map(scalar_text)
                    .ok_or_else(|| ExchangeError::Decode(format!("subscribed event without {id_field}")))?;
                let stream_key = self
                    .subscribed_key_fields
                    .iter()
                    .map(|field| object.get(field).map(scalar_text).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(":");
                Ok(Some(Envelope::Subscribed { stream_key, server_id }))
            }
            "unsubscribed" => {
                let server_id = self
                    .server_id_field
                    .as_ref()
                    .and_then(|field| object.get(field))
                    .map(scalar_text)
                    .unwrap_or_default();
                Ok(Some(Envelope::Unsubscribed { server_id }))
            }
            "error" => {
                let message = ["msg", "message", "error"]
                    .iter()
                    .find_map(|field| object.get(*field))
                    .map(scalar_text)
                    .unwrap_or_else(|| "unspecified stream error".to_string());
                Ok(Some(Envelope::Error { message }))
            }
            other if self.control_events.iter().any(|e| e == other) => Ok(Some(Envelope::Control)),
            _ => Ok(None),
        }
    }
}

impl StreamProtocol for JsonProtocol {
    fn parse(&self, text: &str) -> Result<Envelope> {
        let value: Value = serde_json::from_str(text)?;

        let mut object = match value {
            Value::Array(items) if self.array_channels => return self.parse_array(items),
            Value::Object(object) => object,
            other if self.broadcast_unrouted => {
                return Ok(Envelope::Data {
                    channel: Channel::Broadcast,
                    payload: other,
                });
            }
            _ => return Err(ExchangeError::Decode(format!("unexpected frame: {text}"))),
        };

        if let Some(event_field) = &self.event_field {
            if let Some(event) = object.get(event_field).and_then(Value::as_str) {
                if let Some(envelope) = self.parse_event(event, &object)? {
                    return Ok(envelope);
                }
            }
        }

        if let Some(stream_field) = &self.stream_field {
            if let Some(stream) = object.get(stream_field).and_then(Value::as_str).map(str::to_string) {
                let payload = match &self.data_field {
                    Some(data_field) => object.remove(data_field).unwrap_or(Value::Null),
                    None => Value::Object(object),
                };
                return Ok(Envelope::Data {
                    channel: Channel::Stream(stream),
                    payload,
                });
            }
        }

        // `{"result": null, "id": 1}` style request acknowledgements
        if object.contains_key("id") && (object.contains_key("result") || object.contains_key("status")) {
            if let Some(error) = object.get("error").filter(|e| !e.is_null()) {
                return Ok(Envelope::Error {
                    message: error
                        .get("msg")
                        .map(scalar_text)
                        .unwrap_or_else(|| scalar_text(error)),
                });
            }
            return Ok(Envelope::Control);
        }

        if self.broadcast_unrouted {
            return Ok(Envelope::Data {
                channel: Channel::Broadcast,
                payload: Value::Object(object),
            });
        }
        Ok(Envelope::Control)
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
