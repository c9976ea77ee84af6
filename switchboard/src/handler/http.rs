//! Handlers backed by a remote HTTP endpoint.
//!
//! The capability's arguments travel to the endpoint (JSON body for POST, query string
//! for GET) and the response body comes back as the handler result. Transient failures
//! are retried with linear backoff; client errors are not retried at all.

use std::time::Duration;

use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;

use super::Handler;
use crate::context::ExecutionContext;
use crate::errors::HandlerError;

/// Delay before retry attempt `n` (1-based). Linear, not exponential: the per-attempt
/// budget is already bounded by the endpoint timeout.
fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(100 * attempt as u64)
}

pub struct HttpHandler {
    client: Client,
    url: Url,
    method: Method,
    timeout: Duration,
    retries: u32,
}

impl HttpHandler {
    pub fn new(
        client: Client,
        url: &str,
        method: &str,
        timeout_ms: u64,
        retries: u32,
    ) -> Result<Self, HandlerError> {
        let url = Url::parse(url).map_err(|e| HandlerError::Load(format!("invalid URL: {e}")))?;
        let method = match method.to_ascii_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            other => {
                return Err(HandlerError::Load(format!(
                    "unsupported HTTP method '{other}'"
                )))
            }
        };
        Ok(Self {
            client,
            url,
            method,
            timeout: Duration::from_millis(timeout_ms),
            retries,
        })
    }

    async fn attempt(&self, args: &Value) -> Result<Value, AttemptError> {
        let mut request = self
            .client
            .request(self.method.clone(), self.url.clone())
            .timeout(self.timeout);

        if self.method == Method::GET {
            // Top-level arguments become query parameters.
            if let Value::Object(map) = args {
                let pairs: Vec<(String, String)> = map
                    .iter()
                    .map(|(k, v)| {
                        let text = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), text)
                    })
                    .collect();
                request = request.query(&pairs);
            }
        } else {
            request = request.json(args);
        }

        let response = request.send().await.map_err(AttemptError::Transient)?;
        let status = response.status();
        if status.is_client_error() {
            return Err(AttemptError::Rejected(status));
        }
        if !status.is_success() {
            return Err(AttemptError::ServerError(status));
        }

        let body = response
            .text()
            .await
            .map_err(AttemptError::Transient)?;
        // Endpoints that return plain text still produce a usable result.
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

enum AttemptError {
    /// Connection/timeout failures and 5xx responses: worth retrying.
    Transient(reqwest::Error),
    ServerError(StatusCode),
    /// A 4xx response: the request itself is wrong, retrying cannot help.
    Rejected(StatusCode),
}

#[async_trait::async_trait]
impl Handler for HttpHandler {
    async fn call(&self, args: Value, ctx: &ExecutionContext) -> Result<Value, HandlerError> {
        let attempts = self.retries + 1;
        let mut last_failure = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(backoff(attempt - 1)).await;
            }
            match self.attempt(&args).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Rejected(status)) => {
                    return Err(HandlerError::Execution {
                        name: ctx.capability.clone(),
                        message: format!("endpoint rejected the request with status {status}"),
                    });
                }
                Err(AttemptError::ServerError(status)) => {
                    last_failure = format!("endpoint returned status {status}");
                }
                Err(AttemptError::Transient(e)) => {
                    last_failure = e.to_string();
                }
            }
            tracing::debug!(
                capability = %ctx.capability,
                attempt,
                error = %last_failure,
                "HTTP handler attempt failed"
            );
        }

        Err(HandlerError::Network {
            attempts,
            message: last_failure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use switchboard_mcp_protocol::jsonrpc::RequestId;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(
            "remote",
            RequestId::Num(1),
            Duration::from_secs(5),
            &crate::context::Caller::default(),
        )
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn posts_arguments_and_returns_json_body() {
        let base = serve(Router::new().route(
            "/run",
            post(|Json(args): Json<Value>| async move { Json(json!({ "echoed": args })) }),
        ))
        .await;

        let handler =
            HttpHandler::new(Client::new(), &format!("{base}/run"), "POST", 1000, 0).unwrap();
        let result = handler.call(json!({"a": 1}), &ctx()).await.unwrap();
        assert_eq!(result, json!({ "echoed": { "a": 1 } }));
    }

    #[tokio::test]
    async fn get_sends_arguments_as_query_parameters() {
        let base = serve(Router::new().route(
            "/q",
            get(
                |axum::extract::Query(params): axum::extract::Query<
                    std::collections::HashMap<String, String>,
                >| async move { Json(json!(params)) },
            ),
        ))
        .await;

        let handler =
            HttpHandler::new(Client::new(), &format!("{base}/q"), "GET", 1000, 0).unwrap();
        let result = handler
            .call(json!({"name": "x", "n": 3}), &ctx())
            .await
            .unwrap();
        assert_eq!(result, json!({"name": "x", "n": "3"}));
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let base = serve(Router::new().route(
            "/flaky",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
                    } else {
                        Ok(Json(json!("ok")))
                    }
                }
            }),
        ))
        .await;

        let handler =
            HttpHandler::new(Client::new(), &format!("{base}/flaky"), "POST", 1000, 2).unwrap();
        let result = handler.call(json!({}), &ctx()).await.unwrap();
        assert_eq!(result, json!("ok"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let base = serve(Router::new().route(
            "/bad",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    axum::http::StatusCode::UNPROCESSABLE_ENTITY
                }
            }),
        ))
        .await;

        let handler =
            HttpHandler::new(Client::new(), &format!("{base}/bad"), "POST", 1000, 3).unwrap();
        let err = handler.call(json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, HandlerError::Execution { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_report_attempt_count() {
        // Nothing is listening on this port.
        let handler =
            HttpHandler::new(Client::new(), "http://127.0.0.1:9/void", "POST", 200, 1).unwrap();
        let err = handler.call(json!({}), &ctx()).await.unwrap_err();
        match err {
            HandlerError::Network { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected Network, got {other:?}"),
        }
    }
}
