//! Message types for the wirebus protocol
//!
//! A frame is a [`Header`] plus a [`Payload`]. The header carries routing and
//! correlation metadata; the payload is a JSON object that is either
//! application data or a structured error.

use crate::error::{Result, WirebusError};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Intent of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// One-way event on a topic
    Publish,
    /// Expects a correlated response
    Request,
    /// Answer to a request
    Response,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Publish => "publish",
            ActionType::Request => "request",
            ActionType::Response => "response",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "publish" => Ok(ActionType::Publish),
            "request" => Ok(ActionType::Request),
            "response" => Ok(ActionType::Response),
            other => Err(other.to_string()),
        }
    }
}

/// Which actions a subscription wants delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionFilter {
    Publish,
    Request,
    All,
}

impl ActionFilter {
    /// Returns true if a frame with `action` passes this filter
    pub fn accepts(&self, action: ActionType) -> bool {
        match self {
            ActionFilter::All => true,
            ActionFilter::Publish => action == ActionType::Publish,
            ActionFilter::Request => action == ActionType::Request,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionFilter::Publish => "publish",
            ActionFilter::Request => "request",
            ActionFilter::All => "all",
        }
    }
}

impl fmt::Display for ActionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "publish" => Ok(ActionFilter::Publish),
            "request" => Ok(ActionFilter::Request),
            "all" => Ok(ActionFilter::All),
            _ => Err(format!(
                "Invalid action filter: '{}'. Must be: publish, request, or all",
                s
            )),
        }
    }
}

/// Frame header
///
/// Frames from the broker never carry `parent_request_id` or `timeout`, but
/// the codec reads them when present so both directions share this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub action: ActionType,
    pub topic: String,
    pub version: String,
    pub request_id: Option<String>,
    pub parent_request_id: Option<String>,
    /// Timeout the sender is willing to wait, in milliseconds
    pub timeout: Option<u64>,
}

impl Header {
    pub fn new(action: ActionType, topic: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            action,
            topic: topic.into(),
            version: version.into(),
            request_id: None,
            parent_request_id: None,
            timeout: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_parent_request_id(mut self, id: impl Into<String>) -> Self {
        self.parent_request_id = Some(id.into());
        self
    }

    pub fn with_timeout(mut self, millis: u64) -> Self {
        self.timeout = Some(millis);
        self
    }
}

/// Structured error carried in a payload's `error` member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    /// RFC 3339 timestamp
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl PayloadError {
    /// Create an error stamped with the current UTC time
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn from_member(value: Value) -> Self {
        match value {
            Value::String(message) => Self {
                code: String::new(),
                message,
                timestamp: String::new(),
                details: None,
            },
            other => serde_json::from_value(other.clone()).unwrap_or_else(|_| Self {
                code: String::new(),
                message: other.to_string(),
                timestamp: String::new(),
                details: None,
            }),
        }
    }
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

/// Frame payload: application data or an error, never both
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Success(Map<String, Value>),
    Error(PayloadError),
}

impl Payload {
    /// `{}`
    pub fn empty() -> Self {
        Payload::Success(Map::new())
    }

    /// Serialize `value` into a success payload. It must serialize to a JSON object.
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Payload::Success(map)),
            other => Err(WirebusError::InvalidPayload(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Classify a decoded JSON value.
    ///
    /// Objects with a non-null `error` member are errors; any other object is
    /// data. Non-objects are rejected and the kind is returned.
    pub fn from_value(value: Value) -> std::result::Result<Self, &'static str> {
        match value {
            Value::Object(mut map) => match map.remove("error") {
                Some(Value::Null) | None => Ok(Payload::Success(map)),
                Some(member) => Ok(Payload::Error(PayloadError::from_member(member))),
            },
            other => Err(json_kind(&other)),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Payload::Error(_))
    }

    pub fn as_error(&self) -> Option<&PayloadError> {
        match self {
            Payload::Error(err) => Some(err),
            Payload::Success(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::Success(map) => Some(map),
            Payload::Error(_) => None,
        }
    }

    /// Look up a field of a success payload
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Convert into a plain JSON value, as it appears on the wire
    pub fn to_value(&self) -> Value {
        match self {
            Payload::Success(map) => Value::Object(map.clone()),
            Payload::Error(err) => {
                let mut map = Map::new();
                map.insert(
                    "error".to_string(),
                    serde_json::to_value(err).unwrap_or(Value::Null),
                );
                Value::Object(map)
            }
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::empty()
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Payload::Success(map)
    }
}

impl From<PayloadError> for Payload {
    fn from(err: PayloadError) -> Self {
        Payload::Error(err)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Payload::Success(map) => map.serialize(serializer),
            Payload::Error(err) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", err)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Payload::from_value(value).map_err(|kind| {
            de::Error::custom(format!("payload must be a JSON object, got {}", kind))
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub header: Header,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(header: Header, payload: Payload) -> Self {
        Self { header, payload }
    }
}
