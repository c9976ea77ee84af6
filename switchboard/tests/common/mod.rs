use std::sync::Arc;

use serde_json::Value;
use switchboard::context::{Caller, ExecutionContext};
use switchboard::errors::HandlerError;
use switchboard::handler::registry::HandlerRegistry;
use switchboard::handler::Handler;
use switchboard::{MCPService, MCPServiceBuilder, ServerConfig};
use switchboard_mcp_protocol::jsonrpc::{
    ErrorData, MethodCall, Params, RequestId, ResponseItem, SendableMessage,
};
use tower::Service;

/// The fixture configuration most tests run against: an inline calculator, a
/// registry-backed echo tool, a deliberately slow tool, a templated prompt and a static
/// resource.
pub const FIXTURE_CONFIG: &str = r#"{
    "name": "test-server",
    "version": "0.1.0",
    "description": "Fixture server for integration tests",
    "tools": [
        {
            "name": "calculate",
            "description": "Perform basic arithmetic",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "operation": { "type": "string", "enum": ["add", "subtract", "multiply", "divide"] },
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["operation", "a", "b"]
            },
            "handler": {
                "kind": "inline",
                "code": "if(operation == 'add', a + b, if(operation == 'subtract', a - b, if(operation == 'multiply', a * b, a / b)))"
            }
        },
        {
            "name": "echo",
            "description": "Echo the sanitized arguments",
            "inputSchema": {
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "additionalProperties": false
            },
            "handler": { "kind": "registry", "key": "echo" }
        },
        {
            "name": "slow",
            "description": "Takes longer than its deadline",
            "timeoutMs": 50,
            "handler": { "kind": "registry", "key": "slow" }
        }
    ],
    "prompts": [
        {
            "name": "greet",
            "description": "A friendly greeting",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Who to greet" },
                    "punctuation": { "type": "string" }
                },
                "required": ["name"]
            },
            "template": "Hello, {name}!"
        }
    ],
    "resources": [
        {
            "name": "greeting",
            "description": "A static greeting",
            "mimeType": "text/plain",
            "text": "hello world"
        }
    ]
}"#;

struct SlowHandler;

#[async_trait::async_trait]
impl Handler for SlowHandler {
    async fn call(&self, _args: Value, _ctx: &ExecutionContext) -> Result<Value, HandlerError> {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        Ok(Value::String("too late".to_string()))
    }
}

pub fn fixture_registry() -> Arc<HandlerRegistry> {
    let registry = Arc::new(HandlerRegistry::new());
    registry.register_fn("echo", |args, _ctx| Ok(args));
    registry.register("slow", Arc::new(SlowHandler));
    registry
}

pub fn fixture_server() -> MCPService {
    server_from(FIXTURE_CONFIG)
}

pub fn server_from(config: &str) -> MCPService {
    let config = ServerConfig::from_json(config).expect("fixture config should validate");
    MCPServiceBuilder::new(config)
        .with_registry(fixture_registry())
        .build()
}

pub async fn call_server(
    server: &mut MCPService,
    method: &str,
    params: serde_json::Value,
) -> Option<ResponseItem> {
    let params = match params {
        serde_json::Value::Object(map) => Some(Params::Map(map)),
        serde_json::Value::Array(array) => Some(Params::Array(array)),
        _ => None,
    };

    let request = MethodCall::new(RequestId::Num(1), method.to_string(), params);
    let future = server.call(SendableMessage::from(request));

    future.await.unwrap()
}

/// Like [`call_server`], but with an explicit transport identity.
pub async fn call_server_as(
    server: &MCPService,
    caller: &Caller,
    method: &str,
    params: serde_json::Value,
) -> Option<ResponseItem> {
    let params = match params {
        serde_json::Value::Object(map) => Some(Params::Map(map)),
        serde_json::Value::Array(array) => Some(Params::Array(array)),
        _ => None,
    };

    let request = MethodCall::new(RequestId::Num(1), method.to_string(), params);
    server
        .handle_message(SendableMessage::from(request), caller)
        .await
}

/// Unwrap a success response and return its result value.
pub fn expect_success(response: ResponseItem) -> Value {
    match response {
        ResponseItem::Success { id, result, .. } => {
            assert_eq!(id, RequestId::Num(1));
            result
        }
        ResponseItem::Error { error, .. } => panic!("expected success, got error: {error:?}"),
    }
}

/// Unwrap an error response and return its error data.
pub fn expect_error(response: ResponseItem) -> ErrorData {
    match response {
        ResponseItem::Error { id, error, .. } => {
            assert_eq!(id, RequestId::Num(1));
            error
        }
        ResponseItem::Success { result, .. } => panic!("expected error, got success: {result:?}"),
    }
}
