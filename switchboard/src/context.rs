use std::time::{Duration, Instant};

use switchboard_mcp_protocol::jsonrpc::RequestId;

use crate::session::SessionState;

/// Who is making a request, as established by the transport before dispatch.
///
/// Transports construct one per request; the dispatcher consults it for access control.
/// Stdio has no remote peer and no session concept, so its caller is the default.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    /// Session the request arrived under, when the transport is stateful.
    pub session_id: Option<String>,
    /// API key presented by the client, when authentication is configured.
    pub api_key: Option<String>,
    /// Remote address, used as the rate-limit identity for sessionless calls.
    pub remote_addr: Option<String>,
}

impl Caller {
    /// The identity used for per-client rate limiting: session ID when present,
    /// otherwise the source address.
    pub fn rate_identity(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .or(self.remote_addr.as_deref())
    }
}

/// Per-invocation context handed to a handler. Never persisted.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Session the call belongs to; empty for stateless calls.
    pub session_id: Option<String>,
    /// JSON-RPC request ID, echoed in the response.
    pub request_id: RequestId,
    /// Name of the tool/prompt/resource being invoked.
    pub capability: String,
    /// Absolute time by which the invocation must complete.
    pub deadline: Instant,
    /// The configured timeout the deadline was derived from.
    pub timeout: Duration,
    /// Session state bag, shared across calls on the same session.
    pub session_state: Option<SessionState>,
}

impl ExecutionContext {
    pub fn new(
        capability: impl Into<String>,
        request_id: RequestId,
        timeout: Duration,
        caller: &Caller,
    ) -> Self {
        Self {
            session_id: caller.session_id.clone(),
            request_id,
            capability: capability.into(),
            deadline: Instant::now() + timeout,
            timeout,
            session_state: None,
        }
    }

    pub fn with_session_state(mut self, state: SessionState) -> Self {
        self.session_state = Some(state);
        self
    }

    /// Time left until the deadline. Timeout enforcement abandons rather than aborts, so
    /// handlers that must stop early need to check this themselves.
    pub fn time_remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
