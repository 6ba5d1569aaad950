//! Control message envelope
//!
//! ## Client requests
//! `{"id": "<session id>", "method": 0, "params": ...}`
//!
//! ## Server responses
//! `{"id": "<session id>", "code": 200, "message": "OK", "method": 4, "data": ...}`
//!
//! Methods travel as integers:
//! - `0` PING
//! - `1` SUBSCRIBE
//! - `2` UNSUBSCRIBE
//! - `3` DISCONNECT
//! - `4` BROADCAST (server push only)

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::SessionId;

/// Timestamp layout used for ping replies and broadcast delivery times
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// HTTP-style success code
pub const STATUS_OK: u16 = 200;

/// HTTP-style client error code
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Control method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum Method {
    Ping,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Broadcast,
    /// Any code outside the known range; kept so it can be rejected
    /// without tearing the session down.
    Unknown(i32),
}

impl Method {
    pub fn code(self) -> i32 {
        match self {
            Method::Ping => 0,
            Method::Subscribe => 1,
            Method::Unsubscribe => 2,
            Method::Disconnect => 3,
            Method::Broadcast => 4,
            Method::Unknown(code) => code,
        }
    }
}

impl From<i32> for Method {
    fn from(code: i32) -> Self {
        match code {
            0 => Method::Ping,
            1 => Method::Subscribe,
            2 => Method::Unsubscribe,
            3 => Method::Disconnect,
            4 => Method::Broadcast,
            other => Method::Unknown(other),
        }
    }
}

impl From<Method> for i32 {
    fn from(method: Method) -> Self {
        method.code()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Ping => f.write_str("PING"),
            Method::Subscribe => f.write_str("SUBSCRIBE"),
            Method::Unsubscribe => f.write_str("UNSUBSCRIBE"),
            Method::Disconnect => f.write_str("DISCONNECT"),
            Method::Broadcast => f.write_str("BROADCAST"),
            Method::Unknown(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}

/// Client-to-server request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: SessionId,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Params are present and not JSON null
    pub fn has_params(&self) -> bool {
        matches!(self.params, Some(ref value) if !value.is_null())
    }

    /// Decode params as a list of subject patterns
    pub fn subjects(&self) -> Result<Vec<String>, ProtocolError> {
        let params = self.params.clone().unwrap_or(Value::Null);
        serde_json::from_value(params).map_err(ProtocolError::Params)
    }
}

/// Server-to-client response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: SessionId,
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
    #[serde(default)]
    pub data: Value,
}

impl Response {
    /// Successful reply to `method`
    pub fn normal(id: SessionId, method: Method, data: Value) -> Self {
        Self {
            id,
            code: STATUS_OK,
            message: "OK".to_string(),
            method: Some(method),
            data,
        }
    }

    /// Error reply
    pub fn error(id: SessionId, code: u16, message: impl Into<String>) -> Self {
        Self {
            id,
            code,
            message: message.into(),
            method: None,
            data: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == STATUS_OK
    }
}

/// Event relayed from the upstream bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub subject: String,
    pub timestamp: String,
    pub payload: Value,
}

impl BroadcastEvent {
    /// Build an event from raw bus bytes, stamped with the current time
    pub fn from_bus(subject: impl Into<String>, payload: &[u8]) -> Self {
        let payload = serde_json::from_slice(payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));

        Self {
            subject: subject.into(),
            timestamp: now(),
            payload,
        }
    }

    /// Restamp with the delivery time
    pub fn stamp(&mut self) {
        self.timestamp = now();
    }
}

/// Current local time in [`DATE_FORMAT`]
pub fn now() -> String {
    chrono::Local::now().format(DATE_FORMAT).to_string()
}

/// Parse a request from a raw frame
pub fn parse_request(data: &[u8]) -> Result<Request, ProtocolError> {
    serde_json::from_slice(data).map_err(ProtocolError::Frame)
}

/// Encode a response frame
pub fn encode(response: &Response) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(response).map_err(ProtocolError::Encode)
}

/// Envelope errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("failed to parse request: {0}")]
    Frame(#[source] serde_json::Error),
    #[error("invalid params: {0}")]
    Params(#[source] serde_json::Error),
    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),
}
