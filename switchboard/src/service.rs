//! The protocol dispatcher.
//!
//! `MCPService` handles JSON-RPC messages whatever their origin (stdio, HTTP, SSE, or a
//! direct library call) and returns responses. Transports own framing, sessions and the
//! transport-level security gate; this service owns the method table and the per-call
//! pipeline: capability lookup, access control, argument validation, handler resolution
//! and execution.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;

use serde_json::{json, Value};
use tower::Service;

use crate::config::{CapabilityCatalog, CapabilityDeclaration, ServerConfig};
use crate::context::{Caller, ExecutionContext};
use crate::errors::RequestError;
use crate::handler::registry::HandlerRegistry;
use crate::handler::{execute, HandlerResolver};
use crate::security::SecurityGate;
use crate::session::SessionManager;
use crate::validation::validate;
use switchboard_mcp_protocol::{
    jsonrpc::{
        ErrorCode, ErrorData, MethodCall, Params, Request, RequestId, Response, ResponseItem,
        SendableMessage,
    },
    messages::{
        CallToolResult, GetPromptResult, Implementation, InitializeParams, InitializeResult,
        ListPromptsResult, ListResourcesResult, ListToolsResult, PromptsCapability,
        ReadResourceResult, ResourcesCapability, ServerCapabilities, ToolsCapability,
    },
    prompt::{Prompt as PromptMeta, PromptArgument, PromptMessage, PromptMessageRole},
    resource::{Resource as ResourceMeta, ResourceContents},
    tool::Tool as ToolMeta,
    Content,
};

/// The protocol revision this server speaks natively.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

/// A service that handles MCP requests. Cheap to clone; all shared state is behind
/// `Arc`.
#[derive(Clone)]
pub struct MCPService {
    name: String,
    version: String,
    instructions: String,
    catalog: Arc<CapabilityCatalog>,
    resolver: Arc<HandlerResolver>,
    sessions: Arc<SessionManager>,
    security: Arc<SecurityGate>,
}

/// Build an `MCPService` from a validated configuration document. The capability set is
/// fixed at build time and cannot be modified afterwards.
pub struct MCPServiceBuilder {
    config: ServerConfig,
    registry: Arc<HandlerRegistry>,
}

impl MCPServiceBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(HandlerRegistry::new()),
        }
    }

    /// Supply the registry backing `registry`-kind handler specs.
    pub fn with_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn build(self) -> MCPService {
        let catalog = Arc::new(CapabilityCatalog::from_config(&self.config));
        let sessions = Arc::new(SessionManager::new(
            self.config.session_timeout(),
            self.config.max_sessions,
        ));
        let security = Arc::new(SecurityGate::new(self.config.security.clone()));
        MCPService {
            name: self.config.name,
            version: self.config.version,
            instructions: self.config.description,
            catalog,
            resolver: Arc::new(HandlerResolver::new(self.registry)),
            sessions,
            security,
        }
    }
}

/// Validate and return request parameters as a map.
fn get_request_params(
    params: Option<Params>,
) -> Result<serde_json::Map<String, Value>, RequestError> {
    match params {
        Some(Params::Map(map)) => Ok(map),
        Some(_) => Err(RequestError::InvalidParams(
            "Parameters must be a map-like object".to_string(),
        )),
        None => Err(RequestError::InvalidParams(
            "The request was empty".to_string(),
        )),
    }
}

fn to_result_value<T: serde::Serialize>(result: T) -> Result<Value, RequestError> {
    serde_json::to_value(result)
        .map_err(|e| RequestError::Internal(format!("JSON serialization error: {e}")))
}

/// Render a handler result as display text.
fn render_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl MCPService {
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn security(&self) -> &Arc<SecurityGate> {
        &self.security
    }

    fn capabilities(&self) -> ServerCapabilities {
        // The catalog is fixed after startup, so `list_changed` is always false.
        ServerCapabilities {
            tools: self.catalog.has_tools().then_some(ToolsCapability {
                list_changed: Some(false),
            }),
            prompts: self.catalog.has_prompts().then_some(PromptsCapability {
                list_changed: Some(false),
            }),
            resources: self.catalog.has_resources().then_some(ResourcesCapability {
                subscribe: Some(false),
                list_changed: Some(false),
            }),
        }
    }

    /// Handle one logical unit of input (a single message or a batch) for a caller.
    /// Notifications inside a batch contribute nothing to the output.
    pub async fn handle_request(&self, request: Request, caller: &Caller) -> Response {
        match request {
            Request::Single(msg) => Response::Single(self.handle_message(msg, caller).await),
            Request::Batch(messages) => {
                let mut items = Vec::with_capacity(messages.len());
                for msg in messages {
                    if let Some(item) = self.handle_message(msg, caller).await {
                        items.push(item);
                    }
                }
                Response::Batch(items)
            }
        }
    }

    /// Handle a single JSON-RPC message. Notifications produce no response.
    pub async fn handle_message(
        &self,
        msg: SendableMessage,
        caller: &Caller,
    ) -> Option<ResponseItem> {
        match msg {
            SendableMessage::Request(req) => {
                let id = req.id.clone();
                let method = req.method.clone();
                let result = self.dispatch(req, caller).await;
                Some(match result {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::debug!(method = %method, error = %e, "Request failed");
                        ResponseItem::error(id, ErrorData::from(e))
                    }
                })
            }
            SendableMessage::Notification(note) => {
                tracing::debug!(method = %note.method, "Notification received");
                None
            }
            SendableMessage::Invalid { id } => Some(ResponseItem::error(
                id,
                ErrorData::new(
                    ErrorCode::InvalidRequest,
                    "Not a valid JSON-RPC 2.0 message".to_string(),
                ),
            )),
        }
    }

    async fn dispatch(
        &self,
        req: MethodCall,
        caller: &Caller,
    ) -> Result<ResponseItem, RequestError> {
        match req.method.as_str() {
            "ping" => self.handle_ping(req).await,
            "initialize" => self.handle_initialize(req).await,
            "tools/list" => self.handle_tools_list(req).await,
            "tools/call" => self.handle_tools_call(req, caller).await,
            "prompts/list" => self.handle_prompts_list(req).await,
            "prompts/get" => self.handle_prompts_get(req, caller).await,
            "resources/list" => self.handle_resources_list(req).await,
            "resources/read" => self.handle_resources_read(req, caller).await,
            _ => Err(RequestError::MethodNotFound(req.method)),
        }
    }

    async fn handle_ping(&self, req: MethodCall) -> Result<ResponseItem, RequestError> {
        Ok(ResponseItem::success(req.id, json!({})))
    }

    async fn handle_initialize(&self, req: MethodCall) -> Result<ResponseItem, RequestError> {
        let params = get_request_params(req.params)?;
        let params: InitializeParams = serde_json::from_value(Value::Object(params))
            .map_err(|e| RequestError::InvalidParams(format!("Invalid initialize params: {e}")))?;

        // Echo the client's revision when we speak it; otherwise answer with ours and
        // let the client decide whether to continue.
        let protocol_version =
            if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
                params.protocol_version.clone()
            } else {
                PROTOCOL_VERSION.to_string()
            };
        tracing::info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            protocol_version = %protocol_version,
            "Client initialized"
        );

        let result = InitializeResult {
            protocol_version,
            capabilities: self.capabilities(),
            server_info: Implementation {
                name: self.name.clone(),
                version: self.version.clone(),
            },
            instructions: (!self.instructions.is_empty()).then(|| self.instructions.clone()),
        };
        Ok(ResponseItem::success(req.id, to_result_value(result)?))
    }

    async fn handle_tools_list(&self, req: MethodCall) -> Result<ResponseItem, RequestError> {
        let tools = self
            .catalog
            .tools()
            .map(|decl| {
                Ok(ToolMeta::new(
                    decl.name.clone(),
                    decl.description.clone(),
                    to_result_value(&decl.input_schema)?,
                ))
            })
            .collect::<Result<Vec<_>, RequestError>>()?;
        Ok(ResponseItem::success(
            req.id,
            to_result_value(ListToolsResult { tools })?,
        ))
    }

    async fn handle_tools_call(
        &self,
        req: MethodCall,
        caller: &Caller,
    ) -> Result<ResponseItem, RequestError> {
        let params = get_request_params(req.params)?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RequestError::InvalidParams("No tool name was provided".into()))?;
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let decl = self
            .catalog
            .tool(name)
            .ok_or_else(|| RequestError::UnknownTool(name.to_string()))?
            .clone();

        self.security.check_access(caller, &decl.name)?;
        let sanitized = validate_arguments(&decl, &arguments)?;
        let value = self
            .run_handler(&decl, sanitized, req.id.clone(), caller)
            .await?;

        let result = CallToolResult {
            content: vec![Content::text(render_text(&value))],
            is_error: false,
        };
        Ok(ResponseItem::success(req.id, to_result_value(result)?))
    }

    async fn handle_prompts_list(&self, req: MethodCall) -> Result<ResponseItem, RequestError> {
        let prompts = self
            .catalog
            .prompts()
            .map(|decl| {
                PromptMeta::new(
                    decl.name.clone(),
                    (!decl.description.is_empty()).then(|| decl.description.clone()),
                    prompt_arguments(decl),
                )
            })
            .collect();
        Ok(ResponseItem::success(
            req.id,
            to_result_value(ListPromptsResult { prompts })?,
        ))
    }

    async fn handle_prompts_get(
        &self,
        req: MethodCall,
        caller: &Caller,
    ) -> Result<ResponseItem, RequestError> {
        let params = get_request_params(req.params)?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RequestError::InvalidParams("Missing prompt name".into()))?;
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let decl = self
            .catalog
            .prompt(name)
            .ok_or_else(|| RequestError::UnknownPrompt(name.to_string()))?
            .clone();

        self.security.check_access(caller, &decl.name)?;
        let sanitized = validate_arguments(&decl, &arguments)?;

        let text = if let Some(template) = &decl.template {
            render_template(template, &sanitized)
        } else {
            // Config validation guarantees a handler when there is no template.
            let value = self
                .run_handler(&decl, sanitized, req.id.clone(), caller)
                .await?;
            render_text(&value)
        };

        let result = GetPromptResult {
            description: (!decl.description.is_empty()).then(|| decl.description.clone()),
            messages: vec![PromptMessage::new_text(PromptMessageRole::User, text)],
        };
        Ok(ResponseItem::success(req.id, to_result_value(result)?))
    }

    async fn handle_resources_list(&self, req: MethodCall) -> Result<ResponseItem, RequestError> {
        let resources = self
            .catalog
            .resources()
            .map(|decl| ResourceMeta {
                uri: decl.resource_uri(),
                name: decl.name.clone(),
                description: (!decl.description.is_empty()).then(|| decl.description.clone()),
                mime_type: decl.mime_type.clone(),
            })
            .collect();
        Ok(ResponseItem::success(
            req.id,
            to_result_value(ListResourcesResult { resources })?,
        ))
    }

    async fn handle_resources_read(
        &self,
        req: MethodCall,
        caller: &Caller,
    ) -> Result<ResponseItem, RequestError> {
        let params = get_request_params(req.params)?;
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| RequestError::InvalidParams("Missing resource URI".into()))?;

        let decl = self
            .catalog
            .resource_by_uri(uri)
            .ok_or_else(|| RequestError::UnknownResource(uri.to_string()))?
            .clone();

        self.security.check_access(caller, &decl.name)?;

        let text = if let Some(text) = &decl.text {
            text.clone()
        } else {
            let value = self
                .run_handler(&decl, json!({}), req.id.clone(), caller)
                .await?;
            render_text(&value)
        };

        let result = ReadResourceResult {
            contents: vec![ResourceContents::text(
                uri,
                decl.mime_type
                    .clone()
                    .or_else(|| Some("text/plain".to_string())),
                text,
            )],
        };
        Ok(ResponseItem::success(req.id, to_result_value(result)?))
    }

    async fn run_handler(
        &self,
        decl: &CapabilityDeclaration,
        arguments: Value,
        request_id: RequestId,
        caller: &Caller,
    ) -> Result<Value, RequestError> {
        let spec = decl.handler.as_ref().ok_or_else(|| {
            RequestError::Internal(format!("capability '{}' has no handler", decl.name))
        })?;
        let handler = self.resolver.resolve(spec)?;

        let mut ctx = ExecutionContext::new(&decl.name, request_id, decl.timeout(), caller);
        if let Some(session_id) = &caller.session_id {
            ctx = ctx.with_session_state(self.sessions.get(session_id)?.state);
        }
        Ok(execute(handler, arguments, &ctx).await?)
    }
}

/// Validation precedes execution unconditionally; a failing argument set never reaches
/// the handler.
fn validate_arguments(
    decl: &CapabilityDeclaration,
    arguments: &Value,
) -> Result<Value, RequestError> {
    let outcome = validate(arguments, &decl.input_schema);
    if outcome.valid {
        Ok(outcome.sanitized)
    } else {
        Err(RequestError::Validation(outcome.errors))
    }
}

fn prompt_arguments(decl: &CapabilityDeclaration) -> Option<Vec<PromptArgument>> {
    let properties = decl.input_schema.properties.as_ref()?;
    let required = decl.input_schema.required.clone().unwrap_or_default();
    Some(
        properties
            .iter()
            .map(|(name, schema)| PromptArgument {
                name: name.clone(),
                description: schema.description.clone(),
                required: Some(required.iter().any(|r| r == name)),
            })
            .collect(),
    )
}

/// Substitute `{argument}` placeholders with the sanitized argument values. Unmatched
/// placeholders are left in place.
fn render_template(template: &str, arguments: &Value) -> String {
    let mut rendered = template.to_string();
    if let Value::Object(map) = arguments {
        for (key, value) in map {
            rendered = rendered.replace(&format!("{{{key}}}"), &render_text(value));
        }
    }
    rendered
}

impl Service<SendableMessage> for MCPService {
    type Response = Option<ResponseItem>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    /// Returns a future that handles the request and resolves to an (optional) JSON-RPC
    /// response. Notifications resolve to Ok(None). Requests arriving through the
    /// `Service` interface carry no transport identity and dispatch as a local caller.
    fn call(&mut self, req: SendableMessage) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.handle_message(req, &Caller::default()).await) })
    }
}
