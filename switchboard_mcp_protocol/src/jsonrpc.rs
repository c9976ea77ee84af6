//! JSON-RPC 2.0 envelopes.
//!
//! Largely spec compliant. Messages are assumed to be client-generated; the server never
//! initiates a request of its own.
use serde::{de, Deserialize, Serialize};
use serde_json::Value;
use valuable::Valuable;

/// Message ID. The MCP spec requires this to be a number or a string; `Null` is used for
/// error responses to requests whose ID could not be recovered.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, Valuable)]
#[serde(untagged)]
pub enum RequestId {
    Num(u64),
    Str(String),
    Null,
}

impl RequestId {
    #[inline]
    pub const fn null() -> Self {
        RequestId::Null
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, RequestId::Null)
    }
}

/// Protocol version. Only "2.0" is valid; anything else fails deserialisation.
#[derive(Debug, PartialEq, Clone, Copy, Hash, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JsonRpcVersion {
    V2,
}

impl TryFrom<String> for JsonRpcVersion {
    type Error = serde::de::value::Error;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "2.0" => Ok(JsonRpcVersion::V2),
            _ => Err(serde::de::Error::custom("not a valid JSON-RPC 2.0 message")),
        }
    }
}

impl From<JsonRpcVersion> for String {
    fn from(version: JsonRpcVersion) -> Self {
        match version {
            JsonRpcVersion::V2 => "2.0".to_string(),
        }
    }
}

/// Structured parameters of a request or notification.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Params {
    Array(Vec<Value>),
    Map(serde_json::Map<String, Value>),
}

impl TryFrom<Value> for Params {
    type Error = serde_json::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(vec) => Ok(Params::Array(vec)),
            Value::Object(map) => Ok(Params::Map(map)),
            _ => Err(de::Error::custom(format!(
                "JSON-RPC params must be either an array or object, got {:?}",
                value
            ))),
        }
    }
}

/// An RPC method call (a "request" in JSON-RPC terms).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MethodCall {
    jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
}

impl MethodCall {
    pub fn new(id: RequestId, method: String, params: Option<Params>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion::V2,
            id,
            method,
            params,
        }
    }
}

/// A request without an ID. Notifications never receive a response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Notification {
    jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
}

impl Notification {
    pub fn new(method: String, params: Option<Params>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion::V2,
            method,
            params,
        }
    }
}

/// A single incoming JSON-RPC message.
///
/// `Invalid` captures messages that are syntactically JSON but not a valid method call or
/// notification; the ID is preserved where recoverable so an error response can cite it.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum SendableMessage {
    Request(MethodCall),
    Notification(Notification),
    Invalid { id: RequestId },
}

impl From<MethodCall> for SendableMessage {
    fn from(request: MethodCall) -> Self {
        SendableMessage::Request(request)
    }
}

impl From<Notification> for SendableMessage {
    fn from(notification: Notification) -> Self {
        SendableMessage::Notification(notification)
    }
}

impl<'de> serde::Deserialize<'de> for SendableMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if let Ok(req) = MethodCall::deserialize(&value) {
            return Ok(SendableMessage::Request(req));
        }
        if let Ok(note) = Notification::deserialize(&value) {
            return Ok(SendableMessage::Notification(note));
        }

        // Invalid message. Extract the ID if possible.
        let id = match &value {
            Value::Object(map) => map
                .get("id")
                .and_then(|id| RequestId::deserialize(id).ok())
                .unwrap_or_else(RequestId::null),
            _ => RequestId::Null,
        };
        Ok(SendableMessage::Invalid { id })
    }
}

/// One logical unit of input on a transport: a single message, or a JSON-RPC batch.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Request {
    Single(SendableMessage),
    Batch(Vec<SendableMessage>),
}

impl<'de> serde::Deserialize<'de> for Request {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Array(items) => {
                let messages = items
                    .into_iter()
                    .map(|item| SendableMessage::deserialize(item).map_err(de::Error::custom))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Request::Batch(messages))
            }
            other => {
                let msg = SendableMessage::deserialize(other).map_err(de::Error::custom)?;
                Ok(Request::Single(msg))
            }
        }
    }
}

/// One logical unit of output: a single (possibly absent) response, or a batch.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Response {
    Single(Option<ResponseItem>),
    Batch(Vec<ResponseItem>),
}

impl Response {
    pub fn is_empty(&self) -> bool {
        match self {
            Response::Single(opt) => opt.is_none(),
            Response::Batch(responses) => responses.is_empty(),
        }
    }
}

/// A single JSON-RPC response.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum ResponseItem {
    Success {
        jsonrpc: JsonRpcVersion,
        id: RequestId,
        result: Value,
    },
    Error {
        jsonrpc: JsonRpcVersion,
        id: RequestId,
        error: ErrorData,
    },
}

impl ResponseItem {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self::Success {
            jsonrpc: JsonRpcVersion::V2,
            id,
            result,
        }
    }

    pub fn error(id: RequestId, error: ErrorData) -> Self {
        Self::Error {
            jsonrpc: JsonRpcVersion::V2,
            id,
            error,
        }
    }

    pub fn id(&self) -> &RequestId {
        match self {
            Self::Success { id, .. } => id,
            Self::Error { id, .. } => id,
        }
    }
}

/// Standard JSON-RPC error codes, plus implementation-defined server errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received by the server.
    ParseError,
    /// The JSON sent is not a valid Request object.
    InvalidRequest,
    /// The method does not exist / is not available.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
    /// Custom, implementation-defined server errors.
    Custom(i32),
}

impl ErrorCode {
    pub const fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::Custom(code) => *code,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let code = i32::deserialize(deserializer)?;
        Ok(match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            other => Self::Custom(other),
        })
    }
}

/// Error information for JSON-RPC error responses.
///
/// `data` carries machine-readable detail (error kind, field errors, configured timeouts)
/// so an LLM client can self-correct and retry.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorData {
    /// The error type that occurred.
    pub code: ErrorCode,

    /// A short description of the error; a concise single sentence.
    pub message: String,

    /// Additional, machine-readable information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorData {
    /// Create a new error data instance, with no additional data.
    pub fn new(code: ErrorCode, message: String) -> Self {
        Self {
            code,
            message,
            data: None,
        }
    }

    /// Create a new error data instance with a machine-readable payload.
    pub fn with_data(code: ErrorCode, message: String, data: Value) -> Self {
        Self {
            code,
            message,
            data: Some(data),
        }
    }
}
