//! Streamable HTTP transport.
//!
//! One endpoint, `POST /mcp`, carries the whole protocol. In stateless mode every
//! request is self-contained. In stateful mode an `initialize` request mints a session
//! and the response carries its ID in the `Mcp-Session-Id` header; every subsequent
//! request must present that header, and `DELETE /mcp` ends the session early.
//!
//! The security gate (authentication, origin, rate limit) runs here, before the body is
//! even parsed; capability access control runs later, in the dispatcher.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::post;
use axum::Router;
use serde_json::json;

use crate::config::CorsConfig;
use crate::context::Caller;
use crate::errors::{SecurityError, SessionError};
use crate::service::MCPService;
use crate::transport::TransportError;
use switchboard_mcp_protocol::jsonrpc::{
    ErrorCode, ErrorData, Request, RequestId, Response, ResponseItem, SendableMessage,
};

/// Header carrying the session ID on stateful HTTP.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

#[derive(Clone)]
struct HttpState {
    service: MCPService,
    cors: CorsConfig,
    stateful: bool,
}

/// Build the HTTP router. `stateful` switches on session management.
pub fn router(service: MCPService, cors: CorsConfig, stateful: bool) -> Router {
    let state = HttpState {
        service,
        cors,
        stateful,
    };
    Router::new()
        .route(
            "/mcp",
            post(handle_post)
                .delete(handle_delete)
                .options(handle_preflight),
        )
        .with_state(state)
}

/// Serve the HTTP transport until the process exits.
pub async fn serve_http(
    service: MCPService,
    cors: CorsConfig,
    stateful: bool,
    port: u16,
) -> Result<(), TransportError> {
    let app = router(service, cors, stateful);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, stateful, "HTTP transport listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Establish the caller's identity from request headers. The API key may arrive as a
/// bearer token or in `X-Api-Key`.
fn caller_from(headers: &HeaderMap, addr: SocketAddr) -> Caller {
    let api_key = header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| header_str(headers, "X-Api-Key").map(str::to_string));
    Caller {
        session_id: header_str(headers, SESSION_HEADER).map(str::to_string),
        api_key,
        remote_addr: Some(addr.ip().to_string()),
    }
}

fn security_status(err: &SecurityError) -> StatusCode {
    match err {
        SecurityError::Authentication => StatusCode::UNAUTHORIZED,
        SecurityError::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        SecurityError::OriginRejected(_) | SecurityError::AccessDenied(_) => StatusCode::FORBIDDEN,
    }
}

/// A JSON-RPC error response body with an HTTP status attached.
fn rpc_error(status: StatusCode, error: ErrorData) -> HttpResponse {
    let body = Response::Single(Some(ResponseItem::error(RequestId::Null, error)));
    (status, axum::Json(body)).into_response()
}

fn apply_cors(cors: &CorsConfig, origin: Option<&str>, mut response: HttpResponse) -> HttpResponse {
    if let Some(origin) = origin {
        if let Some(allowed) = cors.allow_origin(origin) {
            if let Ok(value) = HeaderValue::from_str(&allowed) {
                response
                    .headers_mut()
                    .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
        }
    }
    response
}

fn contains_initialize(request: &Request) -> bool {
    let is_init = |msg: &SendableMessage| {
        matches!(msg, SendableMessage::Request(call) if call.method == "initialize")
    };
    match request {
        Request::Single(msg) => is_init(msg),
        Request::Batch(messages) => messages.iter().any(is_init),
    }
}

async fn handle_post(
    State(state): State<HttpState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: String,
) -> HttpResponse {
    let origin = header_str(&headers, header::ORIGIN.as_str()).map(str::to_string);
    let mut caller = caller_from(&headers, addr);
    if !state.stateful {
        // Stateless mode ignores any session header the client sends.
        caller.session_id = None;
    }

    if let Err(e) = state
        .service
        .security()
        .check_request(&caller, origin.as_deref())
    {
        return apply_cors(
            &state.cors,
            origin.as_deref(),
            rpc_error(security_status(&e), ErrorData::from(e)),
        );
    }

    let request: Request = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable request body");
            return apply_cors(
                &state.cors,
                origin.as_deref(),
                rpc_error(
                    StatusCode::BAD_REQUEST,
                    ErrorData::new(ErrorCode::ParseError, "Request body is not valid JSON".into()),
                ),
            );
        }
    };

    // Stateful session management: initialize mints a session, everything else must
    // present one.
    let mut minted_session = None;
    if state.stateful {
        match &caller.session_id {
            Some(session_id) => {
                if let Err(e) = state.service.sessions().touch(session_id) {
                    let status = match &e {
                        SessionError::NotFound(_) | SessionError::Expired(_) => {
                            StatusCode::NOT_FOUND
                        }
                    };
                    return apply_cors(
                        &state.cors,
                        origin.as_deref(),
                        rpc_error(status, ErrorData::from(e)),
                    );
                }
            }
            None if contains_initialize(&request) => {
                let session = state.service.sessions().create(None);
                tracing::info!(session_id = %session.id, "Session created");
                caller.session_id = Some(session.id.clone());
                minted_session = Some(session.id);
            }
            None => {
                return apply_cors(
                    &state.cors,
                    origin.as_deref(),
                    rpc_error(
                        StatusCode::BAD_REQUEST,
                        ErrorData::with_data(
                            ErrorCode::InvalidRequest,
                            format!("Missing {SESSION_HEADER} header"),
                            json!({ "kind": "missingSession" }),
                        ),
                    ),
                );
            }
        }
    }

    let response = state.service.handle_request(request, &caller).await;

    let mut http_response = if response.is_empty() {
        // Notifications produce no body.
        StatusCode::ACCEPTED.into_response()
    } else {
        axum::Json(response).into_response()
    };
    if let Some(session_id) = minted_session {
        if let Ok(value) = HeaderValue::from_str(&session_id) {
            http_response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    apply_cors(&state.cors, origin.as_deref(), http_response)
}

/// Explicit session teardown.
async fn handle_delete(
    State(state): State<HttpState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> HttpResponse {
    let origin = header_str(&headers, header::ORIGIN.as_str()).map(str::to_string);
    let caller = caller_from(&headers, addr);

    if let Err(e) = state
        .service
        .security()
        .check_request(&caller, origin.as_deref())
    {
        return rpc_error(security_status(&e), ErrorData::from(e));
    }
    if !state.stateful {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    match &caller.session_id {
        Some(session_id) if state.service.sessions().destroy(session_id) => {
            StatusCode::NO_CONTENT.into_response()
        }
        Some(session_id) => rpc_error(
            StatusCode::NOT_FOUND,
            ErrorData::from(SessionError::NotFound(session_id.clone())),
        ),
        None => rpc_error(
            StatusCode::BAD_REQUEST,
            ErrorData::new(
                ErrorCode::InvalidRequest,
                format!("Missing {SESSION_HEADER} header"),
            ),
        ),
    }
}

/// CORS preflight. The allow-list lives in configuration; requests from origins not on
/// it simply get no allow header back.
async fn handle_preflight(State(state): State<HttpState>, headers: HeaderMap) -> HttpResponse {
    let origin = header_str(&headers, header::ORIGIN.as_str()).map(str::to_string);
    let mut response = StatusCode::NO_CONTENT.into_response();
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, DELETE, OPTIONS"),
    );
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization, X-Api-Key, Mcp-Session-Id"),
    );
    apply_cors(&state.cors, origin.as_deref(), response)
}
