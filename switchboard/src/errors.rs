use serde_json::json;
use thiserror::Error;

use crate::validation::FieldError;
use switchboard_mcp_protocol::jsonrpc::{ErrorCode, ErrorData};

/// Problems found while loading or validating the configuration document.
///
/// Structural problems are reported together, not one at a time; the process refuses to
/// start until all of them are fixed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration:\n{}", problems.join("\n"))]
    Invalid { problems: Vec<String> },
}

/// Errors raised while resolving or executing a capability handler.
///
/// These surface per-call; none of them is fatal to the server.
#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    /// The handler file could not be loaded, or the named export was missing.
    #[error("Failed to load handler: {0}")]
    Load(String),

    /// The inline code snippet did not compile. Caught at resolution, not at call time.
    #[error("Handler syntax error: {0}")]
    Syntax(String),

    /// The registry has no entry under the configured key.
    #[error("No registered handler under key: {0}")]
    Resolution(String),

    /// The handler ran and failed (or panicked).
    #[error("Handler '{name}' failed: {message}")]
    Execution { name: String, message: String },

    /// The deadline elapsed before the handler completed. The underlying work is
    /// abandoned, not interrupted.
    #[error("Handler '{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    /// An HTTP handler exhausted its retries.
    #[error("HTTP handler failed after {attempts} attempts: {message}")]
    Network { attempts: u32, message: String },
}

/// Security-layer rejections. Always returned before validation or handler execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Authentication failed: missing or invalid API key")]
    Authentication,

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Origin not allowed: {0}")]
    OriginRejected(String),

    #[error("Access denied to capability: {0}")]
    AccessDenied(String),
}

/// Stateful-HTTP specific session failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Unknown session: {0}")]
    NotFound(String),

    #[error("Session expired: {0}")]
    Expired(String),
}

/// Errors raised while *processing* a request.
///
/// These errors assume the request was successfully parsed; errors for invalid framing
/// are handled at the transport level, within
/// [`MessageParseError`](crate::transport::MessageParseError).
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unknown prompt: {0}")]
    UnknownPrompt(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Invalid arguments")]
    Validation(Vec<FieldError>),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

// Implementation-defined JSON-RPC error codes (-32000..-32099 is the server range).
const CODE_HANDLER_EXECUTION: i32 = -32000;
const CODE_HANDLER_LOAD: i32 = -32001;
const CODE_HANDLER_SYNTAX: i32 = -32002;
const CODE_HANDLER_RESOLUTION: i32 = -32003;
const CODE_HANDLER_TIMEOUT: i32 = -32004;
const CODE_HANDLER_NETWORK: i32 = -32005;
const CODE_AUTHENTICATION: i32 = -32010;
const CODE_RATE_LIMIT: i32 = -32011;
const CODE_ORIGIN_REJECTED: i32 = -32012;
const CODE_ACCESS_DENIED: i32 = -32013;
const CODE_SESSION_NOT_FOUND: i32 = -32014;
const CODE_SESSION_EXPIRED: i32 = -32015;

/// Convert a processing error into the wire-level error object.
///
/// Every error carries a `kind` in its `data` payload, plus whatever machine-readable
/// fields the kind defines, so an LLM client can self-correct without parsing prose.
impl From<RequestError> for ErrorData {
    fn from(err: RequestError) -> Self {
        let message = err.to_string();
        match err {
            RequestError::MethodNotFound(_) => ErrorData::new(ErrorCode::MethodNotFound, message),
            RequestError::InvalidParams(_) => ErrorData::new(ErrorCode::InvalidParams, message),
            RequestError::Internal(_) => ErrorData::new(ErrorCode::InternalError, message),
            RequestError::UnknownTool(name) => ErrorData::with_data(
                ErrorCode::InvalidParams,
                message,
                json!({ "kind": "unknownTool", "name": name }),
            ),
            RequestError::UnknownPrompt(name) => ErrorData::with_data(
                ErrorCode::InvalidParams,
                message,
                json!({ "kind": "unknownPrompt", "name": name }),
            ),
            RequestError::UnknownResource(uri) => ErrorData::with_data(
                ErrorCode::InvalidParams,
                message,
                json!({ "kind": "unknownResource", "uri": uri }),
            ),
            RequestError::Validation(errors) => ErrorData::with_data(
                ErrorCode::InvalidParams,
                message,
                json!({ "kind": "validation", "errors": errors }),
            ),
            RequestError::Handler(err) => err.into(),
            RequestError::Security(err) => err.into(),
            RequestError::Session(err) => err.into(),
        }
    }
}

impl From<HandlerError> for ErrorData {
    fn from(err: HandlerError) -> Self {
        let message = err.to_string();
        match err {
            HandlerError::Load(_) => ErrorData::with_data(
                ErrorCode::Custom(CODE_HANDLER_LOAD),
                message,
                json!({ "kind": "handlerLoad" }),
            ),
            HandlerError::Syntax(_) => ErrorData::with_data(
                ErrorCode::Custom(CODE_HANDLER_SYNTAX),
                message,
                json!({ "kind": "handlerSyntax" }),
            ),
            HandlerError::Resolution(key) => ErrorData::with_data(
                ErrorCode::Custom(CODE_HANDLER_RESOLUTION),
                message,
                json!({ "kind": "handlerResolution", "key": key }),
            ),
            HandlerError::Execution { name, .. } => ErrorData::with_data(
                ErrorCode::Custom(CODE_HANDLER_EXECUTION),
                message,
                json!({ "kind": "handlerExecution", "tool": name }),
            ),
            HandlerError::Timeout { name, timeout_ms } => ErrorData::with_data(
                ErrorCode::Custom(CODE_HANDLER_TIMEOUT),
                message,
                json!({ "kind": "handlerTimeout", "tool": name, "timeoutMs": timeout_ms }),
            ),
            HandlerError::Network { attempts, .. } => ErrorData::with_data(
                ErrorCode::Custom(CODE_HANDLER_NETWORK),
                message,
                json!({ "kind": "handlerNetwork", "attempts": attempts }),
            ),
        }
    }
}

impl From<SecurityError> for ErrorData {
    fn from(err: SecurityError) -> Self {
        let message = err.to_string();
        let (code, kind) = match &err {
            SecurityError::Authentication => (CODE_AUTHENTICATION, "authentication"),
            SecurityError::RateLimit => (CODE_RATE_LIMIT, "rateLimit"),
            SecurityError::OriginRejected(_) => (CODE_ORIGIN_REJECTED, "originRejected"),
            SecurityError::AccessDenied(_) => (CODE_ACCESS_DENIED, "accessDenied"),
        };
        ErrorData::with_data(ErrorCode::Custom(code), message, json!({ "kind": kind }))
    }
}

impl From<SessionError> for ErrorData {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        let (code, kind) = match &err {
            SessionError::NotFound(_) => (CODE_SESSION_NOT_FOUND, "sessionNotFound"),
            SessionError::Expired(_) => (CODE_SESSION_EXPIRED, "sessionExpired"),
        };
        ErrorData::with_data(ErrorCode::Custom(code), message, json!({ "kind": kind }))
    }
}

/// Fatal, top-level server errors.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
