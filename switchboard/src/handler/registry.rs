//! Process-wide registry of natively implemented handlers.
//!
//! Capabilities whose behavior cannot be expressed as an expression or an HTTP call are
//! registered here at startup, before any transport opens, and referenced from
//! configuration by key.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use super::{Handler, ResolvedHandler};
use crate::context::ExecutionContext;
use crate::errors::HandlerError;

/// Adapter for plain synchronous functions, the common case for registry entries.
struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(Value, &ExecutionContext) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    async fn call(&self, args: Value, ctx: &ExecutionContext) -> Result<Value, HandlerError> {
        (self.0)(args, ctx)
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    entries: RwLock<HashMap<String, ResolvedHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a key. Re-registering a key replaces the previous entry.
    pub fn register(&self, key: impl Into<String>, handler: ResolvedHandler) {
        self.entries
            .write()
            .expect("registry lock poisoned")
            .insert(key.into(), handler);
    }

    /// Register a synchronous function.
    pub fn register_fn<F>(&self, key: impl Into<String>, f: F)
    where
        F: Fn(Value, &ExecutionContext) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.register(key, Arc::new(FnHandler(f)));
    }

    pub fn get(&self, key: &str) -> Option<ResolvedHandler> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use switchboard_mcp_protocol::jsonrpc::RequestId;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(
            "test",
            RequestId::Num(1),
            Duration::from_secs(1),
            &crate::context::Caller::default(),
        )
    }

    #[tokio::test]
    async fn registered_function_is_callable() {
        let registry = HandlerRegistry::new();
        registry.register_fn("echo", |args, _ctx| Ok(args));

        let handler = registry.get("echo").unwrap();
        let result = handler.call(json!({"msg": "hi"}), &ctx()).await.unwrap();
        assert_eq!(result, json!({"msg": "hi"}));
    }

    #[test]
    fn unknown_key_is_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("nope").is_none());
    }
}
