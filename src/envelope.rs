//! C2 — envelope codec.
//!
//! `Message` is the typed in-memory representation of a payload plus its
//! MQTT5 properties (§9 "record-of-maps for messages" re-architecture).
//! `Envelope` is its JSON wire form, used to carry MQTT5 user-properties
//! over an MQTT3 connection (§4.2).

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An ordered user-property key/value pair. Order matters: §5 requires the
/// rewriter to preserve the relative order of untouched keys and append new
/// ones in the order introduced by its own steps.
pub type UserProperties = Vec<(String, String)>;

/// The typed in-memory representation of an MQTT message (§3 `Message`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub payload: Vec<u8>,
    pub user_properties: UserProperties,
    pub correlation_data: Option<Vec<u8>>,
    pub response_topic: Option<String>,
}

impl Message {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.user_properties.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.user_properties.iter().any(|(k, _)| k == key)
    }

    /// Set a property, overwriting in place if it already exists so the
    /// existing position (and thus order) is preserved; otherwise append.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(entry) = self.user_properties.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.user_properties.push((key.to_string(), value));
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.user_properties.retain(|(k, _)| k != key);
    }

    /// Validate that every user-property key and value is valid UTF-8.
    /// Properties are already `String` in this representation; this exists
    /// as the explicit checkpoint called out by §4.6 ("UTF-8 validation
    /// runs over every user-property key and value before any of the
    /// above") for callers constructing a `Message` from raw bytes.
    pub fn validate_utf8(keys_values: &[(Vec<u8>, Vec<u8>)]) -> Result<UserProperties> {
        let mut out = Vec::with_capacity(keys_values.len());
        for (k, v) in keys_values {
            let key = String::from_utf8(k.clone())
                .map_err(|_| GatewayError::invalid("user-property key is not valid UTF-8"))?;
            let value = String::from_utf8(v.clone())
                .map_err(|_| GatewayError::invalid("user-property value is not valid UTF-8"))?;
            out.push((key, value));
        }
        Ok(out)
    }
}

/// JSON wire form: `{"payload": "...", "properties": {...}}` (§3 `Envelope`,
/// §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

const RESERVED_PROPERTY_KEYS: [&str; 2] = ["correlation_data", "response_topic"];

impl Envelope {
    /// Parse inbound bytes as a JSON envelope, lifting `correlation_data`/
    /// `response_topic` into their MQTT5 slots and leaving the remainder as
    /// `user_properties` (§4.2 "on the MQTT3 inbound side").
    pub fn parse(bytes: &[u8]) -> Result<Message> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;

        let correlation_data = envelope
            .properties
            .get("correlation_data")
            .and_then(Value::as_str)
            .map(|s| s.as_bytes().to_vec());
        let response_topic =
            envelope.properties.get("response_topic").and_then(Value::as_str).map(str::to_string);

        let mut user_properties = Vec::new();
        for (key, value) in envelope.properties.iter() {
            if RESERVED_PROPERTY_KEYS.contains(&key.as_str()) {
                continue;
            }
            let value_str = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            user_properties.push((key.clone(), value_str));
        }

        Ok(Message {
            payload: envelope.payload.into_bytes(),
            user_properties,
            correlation_data,
            response_topic,
        })
    }

    /// Emit a `Message` as JSON bytes: `{properties: flat, payload}` where
    /// `flat` is built by adding every user property, then
    /// `correlation_data`/`response_topic` verbatim if present (§4.2 "When
    /// emitting to the broker" / "on the MQTT3 outbound side").
    pub fn emit(message: &Message) -> Result<Vec<u8>> {
        let mut properties = Map::new();
        for (key, value) in &message.user_properties {
            properties.insert(key.clone(), Value::String(value.clone()));
        }
        if let Some(correlation_data) = &message.correlation_data {
            properties.insert(
                "correlation_data".to_string(),
                Value::String(String::from_utf8_lossy(correlation_data).to_string()),
            );
        }
        if let Some(response_topic) = &message.response_topic {
            properties.insert("response_topic".to_string(), Value::String(response_topic.clone()));
        }

        let envelope = Envelope {
            payload: String::from_utf8_lossy(&message.payload).to_string(),
            properties,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }
}

/// Parse payload bytes per §4.2: for modes other than
/// `service_payload_only` the bytes must decode as a JSON envelope; for
/// `service_payload_only` the raw bytes are the payload and
/// `properties = {}`.
pub fn parse_inbound(bytes: &[u8], payload_only: bool) -> Result<Message> {
    if payload_only {
        Ok(Message {
            payload: bytes.to_vec(),
            user_properties: Vec::new(),
            correlation_data: None,
            response_topic: None,
        })
    } else {
        Envelope::parse(bytes)
    }
}
