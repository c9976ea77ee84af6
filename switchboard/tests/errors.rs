#[allow(unused)]
mod common;

use common::*;
use serde_json::json;
use switchboard::Caller;
use switchboard_mcp_protocol::jsonrpc::ErrorCode;

const SECURED_CONFIG: &str = r#"{
    "name": "secured",
    "version": "0.1.0",
    "tools": [
        {
            "name": "calculate",
            "description": "Perform basic arithmetic",
            "handler": { "kind": "inline", "code": "a / b" }
        },
        {
            "name": "echo",
            "description": "Echo",
            "handler": { "kind": "registry", "key": "echo" }
        },
        {
            "name": "admin_reset",
            "description": "Nobody gets this one",
            "handler": { "kind": "registry", "key": "echo" }
        }
    ],
    "security": {
        "accessControl": {
            "deny": ["admin_reset"],
            "perKey": {
                "narrow-key": { "allow": ["calculate"] }
            }
        }
    }
}"#;

#[tokio::test]
async fn handler_failure_uses_the_execution_error_code() {
    let mut server = fixture_server();

    // Division by zero fails inside the expression, not in validation.
    let response = call_server(
        &mut server,
        "tools/call",
        json!({
            "name": "calculate",
            "arguments": { "operation": "divide", "a": 1, "b": 0 }
        }),
    )
    .await
    .unwrap();

    let error = expect_error(response);
    assert_eq!(error.code, ErrorCode::Custom(-32000));
    let data = error.data.unwrap();
    assert_eq!(data["kind"], "handlerExecution");
    assert_eq!(data["tool"], "calculate");
}

#[tokio::test]
async fn missing_registry_entry_is_a_resolution_error() {
    let mut server = server_from(
        r#"{
            "name": "demo",
            "version": "0.1.0",
            "tools": [{
                "name": "ghost",
                "handler": { "kind": "registry", "key": "not-registered" }
            }]
        }"#,
    );

    let response = call_server(
        &mut server,
        "tools/call",
        json!({ "name": "ghost", "arguments": {} }),
    )
    .await
    .unwrap();

    let error = expect_error(response);
    assert_eq!(error.code, ErrorCode::Custom(-32003));
    let data = error.data.unwrap();
    assert_eq!(data["kind"], "handlerResolution");
    assert_eq!(data["key"], "not-registered");
}

#[tokio::test]
async fn inline_syntax_errors_surface_at_call_time() {
    let mut server = server_from(
        r#"{
            "name": "demo",
            "version": "0.1.0",
            "tools": [{
                "name": "broken",
                "handler": { "kind": "inline", "code": "a + " }
            }]
        }"#,
    );

    let response = call_server(
        &mut server,
        "tools/call",
        json!({ "name": "broken", "arguments": {} }),
    )
    .await
    .unwrap();

    let error = expect_error(response);
    assert_eq!(error.code, ErrorCode::Custom(-32002));
    assert_eq!(error.data.unwrap()["kind"], "handlerSyntax");
}

#[tokio::test]
async fn array_params_are_rejected() {
    let mut server = fixture_server();

    let response = call_server(&mut server, "tools/call", json!(["calculate"]))
        .await
        .unwrap();

    let error = expect_error(response);
    assert_eq!(error.code, ErrorCode::InvalidParams);
}

#[tokio::test]
async fn globally_denied_capability_is_refused_for_everyone() {
    let server = server_from(SECURED_CONFIG);

    let response = call_server_as(
        &server,
        &Caller::default(),
        "tools/call",
        json!({ "name": "admin_reset", "arguments": {} }),
    )
    .await
    .unwrap();

    let error = expect_error(response);
    assert_eq!(error.code, ErrorCode::Custom(-32013));
    assert_eq!(error.data.unwrap()["kind"], "accessDenied");
}

#[tokio::test]
async fn per_key_allow_list_narrows_access() {
    let server = server_from(SECURED_CONFIG);
    let caller = Caller {
        api_key: Some("narrow-key".to_string()),
        ..Caller::default()
    };

    // The key's allow list contains calculate, so that call goes through.
    let response = call_server_as(
        &server,
        &caller,
        "tools/call",
        json!({
            "name": "calculate",
            "arguments": { "a": 6, "b": 2 }
        }),
    )
    .await
    .unwrap();
    expect_success(response);

    // echo is fine for anonymous callers but outside this key's allow list.
    let response = call_server_as(
        &server,
        &caller,
        "tools/call",
        json!({ "name": "echo", "arguments": {} }),
    )
    .await
    .unwrap();
    let error = expect_error(response);
    assert_eq!(error.code, ErrorCode::Custom(-32013));

    let anonymous = call_server_as(
        &server,
        &Caller::default(),
        "tools/call",
        json!({ "name": "echo", "arguments": {} }),
    )
    .await
    .unwrap();
    expect_success(anonymous);
}

#[tokio::test]
async fn access_is_checked_before_validation() {
    let server = server_from(SECURED_CONFIG);

    // Arguments are nonsense, but the caller never gets far enough to hear that.
    let response = call_server_as(
        &server,
        &Caller::default(),
        "tools/call",
        json!({ "name": "admin_reset", "arguments": "not-an-object" }),
    )
    .await
    .unwrap();

    let error = expect_error(response);
    assert_eq!(error.data.unwrap()["kind"], "accessDenied");
}
