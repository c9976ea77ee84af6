//! Handler resolution and execution.
//!
//! A capability declaration carries a [`HandlerSpec`](crate::config::HandlerSpec)
//! describing *how* to run it; this module turns that description into something
//! callable and runs it under the capability's deadline. Resolution is cached per spec,
//! so a file is read (and an expression compiled) once, not per call.

pub mod expr;
pub mod http;
pub mod registry;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::config::HandlerSpec;
use crate::context::ExecutionContext;
use crate::errors::HandlerError;
use registry::HandlerRegistry;

/// A resolved, callable capability handler.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, args: Value, ctx: &ExecutionContext) -> Result<Value, HandlerError>;
}

pub type ResolvedHandler = Arc<dyn Handler>;

impl std::fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Handler")
    }
}

/// An inline or file-exported expression, compiled once at resolution.
struct ExprHandler {
    expr: expr::Expr,
}

#[async_trait::async_trait]
impl Handler for ExprHandler {
    async fn call(&self, args: Value, ctx: &ExecutionContext) -> Result<Value, HandlerError> {
        let map = match args {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(HandlerError::Execution {
                    name: ctx.capability.clone(),
                    message: format!("expected an argument object, got {other}"),
                })
            }
        };
        self.expr
            .eval(&map)
            .map_err(|e| HandlerError::Execution {
                name: ctx.capability.clone(),
                message: e.to_string(),
            })
    }
}

/// Parse a handler definitions file: one `name = expression` per line, `#` comments.
fn parse_definitions(src: &str) -> Result<BTreeMap<String, expr::Expr>, String> {
    let mut exports = BTreeMap::new();
    for (index, line) in src.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let name_end = line
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(line.len());
        let name = &line[..name_end];
        let rest = line[name_end..].trim_start();
        if name.is_empty() || !rest.starts_with('=') || rest.starts_with("==") {
            return Err(format!(
                "line {line_no}: expected `name = expression`"
            ));
        }
        let body = &rest[1..];
        let compiled = expr::parse(body).map_err(|e| format!("line {line_no}: {e}"))?;
        if exports.insert(name.to_string(), compiled).is_some() {
            return Err(format!("line {line_no}: duplicate definition of '{name}'"));
        }
    }
    Ok(exports)
}

/// Resolves handler specs to callable handlers, caching each successful resolution.
///
/// The cache key is the spec itself, so two capabilities sharing a file/export pair (or
/// an identical inline snippet) share one compiled handler. Failures are not cached; a
/// fixed file is picked up on the next call.
pub struct HandlerResolver {
    registry: Arc<HandlerRegistry>,
    client: reqwest::Client,
    cache: Mutex<HashMap<HandlerSpec, ResolvedHandler>>,
}

impl HandlerResolver {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            client: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, spec: &HandlerSpec) -> Result<ResolvedHandler, HandlerError> {
        if let Some(handler) = self
            .cache
            .lock()
            .expect("resolver lock poisoned")
            .get(spec)
        {
            return Ok(Arc::clone(handler));
        }

        let handler = self.build(spec)?;
        self.cache
            .lock()
            .expect("resolver lock poisoned")
            .insert(spec.clone(), Arc::clone(&handler));
        Ok(handler)
    }

    fn build(&self, spec: &HandlerSpec) -> Result<ResolvedHandler, HandlerError> {
        match spec {
            HandlerSpec::Inline { code } => {
                let expr = expr::parse(code).map_err(|e| HandlerError::Syntax(e.to_string()))?;
                Ok(Arc::new(ExprHandler { expr }))
            }
            HandlerSpec::File { path, export } => {
                let src = std::fs::read_to_string(path)
                    .map_err(|e| HandlerError::Load(format!("{path}: {e}")))?;
                let mut exports =
                    parse_definitions(&src).map_err(|e| HandlerError::Load(format!("{path}: {e}")))?;
                let expr = exports.remove(export).ok_or_else(|| {
                    HandlerError::Load(format!("{path}: no definition named '{export}'"))
                })?;
                Ok(Arc::new(ExprHandler { expr }))
            }
            HandlerSpec::Http {
                url,
                method,
                timeout_ms,
                retries,
            } => Ok(Arc::new(http::HttpHandler::new(
                self.client.clone(),
                url,
                method,
                *timeout_ms,
                *retries,
            )?)),
            HandlerSpec::Registry { key } => self
                .registry
                .get(key)
                .ok_or_else(|| HandlerError::Resolution(key.clone())),
        }
    }
}

/// Run a handler under the capability's deadline.
///
/// The handler runs on its own task; on timeout the task is *abandoned*, not aborted.
/// Yanking a task mid-flight could leave shared session state half-written, so the work
/// is left to finish (or fail) in the background while the caller gets a timeout error.
/// A panicking handler is contained here and reported as an execution failure.
pub async fn execute(
    handler: ResolvedHandler,
    args: Value,
    ctx: &ExecutionContext,
) -> Result<Value, HandlerError> {
    let task_ctx = ctx.clone();
    let task = tokio::spawn(async move { handler.call(args, &task_ctx).await });

    match tokio::time::timeout(ctx.timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            tracing::error!(capability = %ctx.capability, error = %join_err, "Handler panicked");
            Err(HandlerError::Execution {
                name: ctx.capability.clone(),
                message: "handler panicked".to_string(),
            })
        }
        Err(_) => {
            tracing::warn!(
                capability = %ctx.capability,
                timeout_ms = ctx.timeout.as_millis() as u64,
                "Handler deadline elapsed; abandoning the running task"
            );
            Err(HandlerError::Timeout {
                name: ctx.capability.clone(),
                timeout_ms: ctx.timeout.as_millis() as u64,
            })
        }
    }
}
