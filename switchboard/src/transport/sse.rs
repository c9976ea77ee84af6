//! Legacy SSE transport (protocol revision 2024-11-05).
//!
//! The client opens `GET /sse` and keeps the stream for the life of the session. The
//! first event is an `endpoint` event whose data is a JSON object carrying the session
//! ID and the POST URL; requests go to `POST /messages?sessionId=...` and responses come
//! back over the stream as `message` events. Closing the stream ends the session.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::{get, post};
use axum::Router;
use futures::Stream;
use pin_project::{pin_project, pinned_drop};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::CorsConfig;
use crate::context::Caller;
use crate::errors::SessionError;
use crate::service::MCPService;
use crate::session::SessionManager;
use crate::transport::TransportError;
use switchboard_mcp_protocol::jsonrpc::{ErrorCode, ErrorData, Request};

/// Outbound channel depth per session. Small: a stalled client applies backpressure to
/// its own requests only.
const CHANNEL_CAPACITY: usize = 32;

type Channels = Arc<Mutex<HashMap<String, mpsc::Sender<Event>>>>;

#[derive(Clone)]
struct SseState {
    service: MCPService,
    cors: CorsConfig,
    channels: Channels,
}

pub fn router(service: MCPService, cors: CorsConfig) -> Router {
    let state = SseState {
        service,
        cors,
        channels: Arc::new(Mutex::new(HashMap::new())),
    };
    Router::new()
        .route("/sse", get(handle_open))
        .route("/messages", post(handle_message))
        .with_state(state)
}

pub async fn serve_sse(
    service: MCPService,
    cors: CorsConfig,
    port: u16,
) -> Result<(), TransportError> {
    let app = router(service, cors);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "SSE transport listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// The event stream handed to the client. Dropping it (client disconnect) tears the
/// session down.
#[pin_project(PinnedDrop)]
struct SessionStream {
    #[pin]
    inner: ReceiverStream<Event>,
    session_id: String,
    sessions: Arc<SessionManager>,
    channels: Channels,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project()
            .inner
            .poll_next(cx)
            .map(|item| item.map(Ok))
    }
}

#[pinned_drop]
impl PinnedDrop for SessionStream {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        this.channels
            .lock()
            .expect("channel map lock poisoned")
            .remove(this.session_id);
        this.sessions.destroy(this.session_id);
        tracing::info!(session_id = %this.session_id, "SSE stream closed");
    }
}

async fn handle_open(
    State(state): State<SseState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> HttpResponse {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    let caller = caller_from(&headers, addr, None);
    if let Err(e) = state.service.security().check_request(&caller, origin) {
        return (security_status(&e), e.to_string()).into_response();
    }

    let session = state.service.sessions().create(None);
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    // The endpoint event must be first on the stream; queue it before the client can
    // observe anything else.
    let payload = serde_json::json!({
        "sessionId": session.id,
        "endpoint": format!("/messages?sessionId={}", session.id),
    });
    let endpoint = match Event::default().event("endpoint").json_data(&payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialise endpoint event");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if tx.try_send(endpoint).is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    state
        .channels
        .lock()
        .expect("channel map lock poisoned")
        .insert(session.id.clone(), tx);
    tracing::info!(session_id = %session.id, "SSE stream opened");

    let stream = SessionStream {
        inner: ReceiverStream::new(rx),
        session_id: session.id,
        sessions: Arc::clone(state.service.sessions()),
        channels: Arc::clone(&state.channels),
    };
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

#[derive(serde::Deserialize)]
struct MessageParams {
    #[serde(rename = "sessionId")]
    session_id: String,
}

async fn handle_message(
    State(state): State<SseState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<MessageParams>,
    headers: HeaderMap,
    body: String,
) -> HttpResponse {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    let caller = caller_from(&headers, addr, Some(params.session_id.clone()));
    if let Err(e) = state.service.security().check_request(&caller, origin) {
        return (security_status(&e), e.to_string()).into_response();
    }

    if let Err(e) = state.service.sessions().touch(&params.session_id) {
        let status = match &e {
            SessionError::NotFound(_) | SessionError::Expired(_) => StatusCode::NOT_FOUND,
        };
        return (status, e.to_string()).into_response();
    }
    let Some(tx) = state
        .channels
        .lock()
        .expect("channel map lock poisoned")
        .get(&params.session_id)
        .cloned()
    else {
        return (StatusCode::NOT_FOUND, "No open stream for session").into_response();
    };

    let request: Request = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable request body");
            let error = ErrorData::new(ErrorCode::ParseError, "Request body is not valid JSON".into());
            return (StatusCode::BAD_REQUEST, serde_json::to_string(&error).unwrap_or_default())
                .into_response();
        }
    };

    let response = state.service.handle_request(request, &caller).await;
    if !response.is_empty() {
        match serde_json::to_string(&response) {
            Ok(json) => {
                if tx.send(Event::default().event("message").data(json)).await.is_err() {
                    tracing::warn!(session_id = %params.session_id, "SSE stream gone; response dropped");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialise response"),
        }
    }

    // Responses travel on the stream, not in this HTTP exchange.
    StatusCode::ACCEPTED.into_response()
}

fn caller_from(headers: &HeaderMap, addr: SocketAddr, session_id: Option<String>) -> Caller {
    let api_key = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("X-Api-Key")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        });
    Caller {
        session_id,
        api_key,
        remote_addr: Some(addr.ip().to_string()),
    }
}

fn security_status(err: &crate::errors::SecurityError) -> StatusCode {
    use crate::errors::SecurityError;
    match err {
        SecurityError::Authentication => StatusCode::UNAUTHORIZED,
        SecurityError::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        SecurityError::OriginRejected(_) | SecurityError::AccessDenied(_) => StatusCode::FORBIDDEN,
    }
}
