#[allow(unused)]
mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::*;
use serde_json::json;
use switchboard::config::CorsConfig;
use switchboard::transport::sse::router;

async fn spawn_server() -> SocketAddr {
    let app = router(fixture_server(), CorsConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// Read SSE frames until one with the given event type arrives.
async fn next_event(response: &mut reqwest::Response, event: &str) -> String {
    let wanted = format!("event: {event}");
    let mut buffer = String::new();
    loop {
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .expect("timed out waiting for SSE event")
            .unwrap()
            .expect("stream ended before the event arrived");
        buffer.push_str(std::str::from_utf8(&chunk).unwrap());

        // Frames are terminated by a blank line.
        while let Some(end) = buffer.find("\n\n") {
            let frame = buffer[..end].to_string();
            buffer.drain(..end + 2);
            if frame.lines().any(|line| line == wanted) {
                let data = frame
                    .lines()
                    .find_map(|line| line.strip_prefix("data: "))
                    .expect("event frame should carry data");
                return data.to_string();
            }
        }
    }
}

#[tokio::test]
async fn endpoint_event_opens_the_session() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let mut stream = client
        .get(format!("http://{addr}/sse"))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);

    // The first event is JSON carrying the session ID and the POST endpoint.
    let endpoint = next_event(&mut stream, "endpoint").await;
    let endpoint: serde_json::Value = serde_json::from_str(&endpoint).unwrap();
    let session_id = endpoint["sessionId"].as_str().unwrap();
    assert!(!session_id.is_empty());
    let post_path = endpoint["endpoint"].as_str().unwrap();
    assert_eq!(post_path, format!("/messages?sessionId={session_id}"));

    // Requests go to that endpoint; responses come back on the stream.
    let response = client
        .post(format!("http://{addr}{post_path}"))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    let message = next_event(&mut stream, "message").await;
    let body: serde_json::Value = serde_json::from_str(&message).unwrap();
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"], json!({}));
}

#[tokio::test]
async fn posting_to_an_unknown_session_fails() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/messages?sessionId=not-a-session"))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
