#[allow(unused)]
mod common;

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use serde_json::json;
use switchboard::handler::registry::HandlerRegistry;
use switchboard::{MCPServiceBuilder, ServerConfig};
use switchboard_mcp_protocol::{
    jsonrpc::ErrorCode,
    messages::{CallToolResult, ListToolsResult},
    Content, TextContent,
};

// Tool tests
// Spec: https://spec.modelcontextprotocol.io/specification/2025-03-26/server/tools/

fn text_of(result: &CallToolResult) -> &str {
    match &result.content[0] {
        Content::Text(TextContent { text }) => text,
        other => panic!("expected text content, got {other:?}"),
    }
}

#[tokio::test]
async fn tools_list_reflects_configuration() {
    let mut server = fixture_server();

    let response = call_server(&mut server, "tools/list", json!({})).await.unwrap();
    let actual: ListToolsResult = serde_json::from_value(expect_success(response)).unwrap();

    let names: Vec<&str> = actual.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["calculate", "echo", "slow"]);

    let calculate = &actual.tools[0];
    assert_eq!(calculate.description, "Perform basic arithmetic");
    assert_eq!(calculate.input_schema["type"], "object");
    assert_eq!(
        calculate.input_schema["properties"]["operation"]["enum"],
        json!(["add", "subtract", "multiply", "divide"])
    );
    assert_eq!(
        calculate.input_schema["required"],
        json!(["operation", "a", "b"])
    );
}

#[tokio::test]
async fn tools_call_returns_text_result() {
    let mut server = fixture_server();

    let response = call_server(
        &mut server,
        "tools/call",
        json!({
            "name": "calculate",
            "arguments": { "operation": "add", "a": 5, "b": 3 }
        }),
    )
    .await
    .unwrap();

    let result: CallToolResult = serde_json::from_value(expect_success(response)).unwrap();
    assert_eq!(text_of(&result), "8");
    assert!(!result.is_error);
}

#[tokio::test]
async fn tools_call_division() {
    let mut server = fixture_server();

    let response = call_server(
        &mut server,
        "tools/call",
        json!({
            "name": "calculate",
            "arguments": { "operation": "divide", "a": 1, "b": 2 }
        }),
    )
    .await
    .unwrap();

    let result: CallToolResult = serde_json::from_value(expect_success(response)).unwrap();
    assert_eq!(text_of(&result), "0.5");
}

#[tokio::test]
async fn untaken_branches_cannot_fail_a_valid_call() {
    let mut server = fixture_server();

    // `b` is zero, but only the `add` branch of the calculator runs; the divide
    // branch must stay dormant.
    let response = call_server(
        &mut server,
        "tools/call",
        json!({
            "name": "calculate",
            "arguments": { "operation": "add", "a": 5, "b": 0 }
        }),
    )
    .await
    .unwrap();

    let result: CallToolResult = serde_json::from_value(expect_success(response)).unwrap();
    assert_eq!(text_of(&result), "5");
}

#[tokio::test]
async fn missing_required_arguments_are_all_reported() {
    let mut server = fixture_server();

    let response = call_server(
        &mut server,
        "tools/call",
        json!({ "name": "calculate", "arguments": { "a": 1 } }),
    )
    .await
    .unwrap();

    let error = expect_error(response);
    assert_eq!(error.code, ErrorCode::InvalidParams);
    let data = error.data.unwrap();
    assert_eq!(data["kind"], "validation");
    let errors = data["errors"].as_array().unwrap();
    // Both missing fields appear, in declaration order.
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0]["path"], "operation");
    assert_eq!(errors[0]["receivedType"], "missing");
    assert_eq!(errors[1]["path"], "b");
}

#[tokio::test]
async fn wrong_type_is_not_coerced() {
    let mut server = fixture_server();

    // "5" is a string; a permissive server would coerce it. This one reports it.
    let response = call_server(
        &mut server,
        "tools/call",
        json!({
            "name": "calculate",
            "arguments": { "operation": "add", "a": "5", "b": 3 }
        }),
    )
    .await
    .unwrap();

    let error = expect_error(response);
    assert_eq!(error.code, ErrorCode::InvalidParams);
    let errors = error.data.unwrap()["errors"].clone();
    assert_eq!(errors[0]["path"], "a");
    assert_eq!(errors[0]["expectedType"], "number");
    assert_eq!(errors[0]["receivedType"], "string");
}

#[tokio::test]
async fn enum_violation_rejected() {
    let mut server = fixture_server();

    let response = call_server(
        &mut server,
        "tools/call",
        json!({
            "name": "calculate",
            "arguments": { "operation": "exponentiate", "a": 2, "b": 10 }
        }),
    )
    .await
    .unwrap();

    let error = expect_error(response);
    assert_eq!(error.code, ErrorCode::InvalidParams);
    assert_eq!(error.data.unwrap()["errors"][0]["path"], "operation");
}

#[tokio::test]
async fn unknown_keys_stripped_before_the_handler_runs() {
    let mut server = fixture_server();

    // The echo tool reflects exactly what its handler received.
    let response = call_server(
        &mut server,
        "tools/call",
        json!({
            "name": "echo",
            "arguments": { "message": "hi", "unexpected": 42 }
        }),
    )
    .await
    .unwrap();

    let result: CallToolResult = serde_json::from_value(expect_success(response)).unwrap();
    assert_eq!(text_of(&result), r#"{"message":"hi"}"#);
}

#[tokio::test]
async fn unknown_tool_is_reported_with_machine_readable_data() {
    let mut server = fixture_server();

    let response = call_server(
        &mut server,
        "tools/call",
        json!({ "name": "some_invalid_tool", "arguments": {} }),
    )
    .await
    .unwrap();

    let error = expect_error(response);
    assert_eq!(error.code, ErrorCode::InvalidParams);
    assert_eq!(error.message, "Unknown tool: some_invalid_tool");
    let data = error.data.unwrap();
    assert_eq!(data["kind"], "unknownTool");
    assert_eq!(data["name"], "some_invalid_tool");
}

#[tokio::test]
async fn slow_handler_times_out_with_configured_deadline() {
    let mut server = fixture_server();

    let started = std::time::Instant::now();
    let response = call_server(
        &mut server,
        "tools/call",
        json!({ "name": "slow", "arguments": {} }),
    )
    .await
    .unwrap();
    // The handler sleeps 200ms; the 50ms deadline must cut the wait short.
    assert!(started.elapsed() < std::time::Duration::from_millis(150));

    let error = expect_error(response);
    assert_eq!(error.code, ErrorCode::Custom(-32004));
    let data = error.data.unwrap();
    assert_eq!(data["kind"], "handlerTimeout");
    assert_eq!(data["tool"], "slow");
    assert_eq!(data["timeoutMs"], 50);
}

#[tokio::test]
async fn rejected_calls_never_reach_the_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(HandlerRegistry::new());
    let counter = Arc::clone(&calls);
    registry.register_fn("counted", move |args, _ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(args)
    });

    let config = ServerConfig::from_json(
        r#"{
            "name": "counter-server",
            "version": "0.1.0",
            "tools": [{
                "name": "counted",
                "description": "Counts its invocations",
                "inputSchema": {
                    "type": "object",
                    "properties": { "n": { "type": "number" } },
                    "required": ["n"]
                },
                "handler": { "kind": "registry", "key": "counted" }
            }]
        }"#,
    )
    .unwrap();
    let mut server = MCPServiceBuilder::new(config).with_registry(registry).build();

    let response = call_server(
        &mut server,
        "tools/call",
        json!({ "name": "counted", "arguments": { "n": "not-a-number" } }),
    )
    .await
    .unwrap();
    let error = expect_error(response);
    assert_eq!(error.code, ErrorCode::InvalidParams);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // A valid call reaches it exactly once.
    let response = call_server(
        &mut server,
        "tools/call",
        json!({ "name": "counted", "arguments": { "n": 3 } }),
    )
    .await
    .unwrap();
    expect_success(response);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn file_handlers_are_read_once_and_cached() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "double = a * 2").unwrap();
    file.flush().unwrap();
    let path = file.path().to_string_lossy().to_string();

    let config = format!(
        r#"{{
            "name": "file-server",
            "version": "0.1.0",
            "tools": [{{
                "name": "double",
                "description": "Doubles a number",
                "inputSchema": {{
                    "type": "object",
                    "properties": {{ "a": {{ "type": "number" }} }},
                    "required": ["a"]
                }},
                "handler": {{ "kind": "file", "path": "{path}", "export": "double" }}
            }}]
        }}"#
    );
    let mut server = server_from(&config);

    let response = call_server(
        &mut server,
        "tools/call",
        json!({ "name": "double", "arguments": { "a": 3 } }),
    )
    .await
    .unwrap();
    let result: CallToolResult = serde_json::from_value(expect_success(response)).unwrap();
    assert_eq!(text_of(&result), "6");

    // The first call resolved and cached the compiled handler; deleting the file
    // proves later calls never re-read it.
    file.close().unwrap();

    let response = call_server(
        &mut server,
        "tools/call",
        json!({ "name": "double", "arguments": { "a": 4 } }),
    )
    .await
    .unwrap();
    let result: CallToolResult = serde_json::from_value(expect_success(response)).unwrap();
    assert_eq!(text_of(&result), "8");
}

#[tokio::test]
async fn tools_call_without_arguments_object() {
    let mut server = fixture_server();

    // No arguments at all is fine for a tool whose schema requires nothing.
    let response = call_server(&mut server, "tools/call", json!({ "name": "echo" }))
        .await
        .unwrap();
    let result: CallToolResult = serde_json::from_value(expect_success(response)).unwrap();
    assert_eq!(text_of(&result), "{}");
}
