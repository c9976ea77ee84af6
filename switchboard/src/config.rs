//! The configuration document and the capability catalog built from it.
//!
//! Capabilities are not hard-coded: every tool, prompt and resource the server exposes
//! is declared here and bound at runtime to one of the pluggable handler kinds. The
//! document is consumed once at startup; a malformed document is rejected before any
//! transport opens, with every structural problem reported together.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::validation::InputSchema;

pub const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

fn default_handler_timeout() -> u64 {
    DEFAULT_HANDLER_TIMEOUT_MS
}

fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_port() -> u16 {
    3000
}

fn default_export() -> String {
    "default".to_string()
}

fn default_http_method() -> String {
    "POST".to_string()
}

fn default_http_timeout() -> u64 {
    10_000
}

/// How a capability is executed. A closed tagged union: adding a fifth handler kind is a
/// compile-time-checked change, and resolution matches exhaustively instead of sniffing
/// fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HandlerSpec {
    /// A named export from a handler definitions file.
    File {
        path: String,
        #[serde(default = "default_export")]
        export: String,
    },
    /// An inline expression, compiled at resolution time.
    Inline { code: String },
    /// A remote HTTP endpoint. Carries its own timeout and retry budget for the
    /// outbound call, independent of the capability's overall deadline.
    #[serde(rename_all = "camelCase")]
    Http {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default = "default_http_timeout")]
        timeout_ms: u64,
        #[serde(default)]
        retries: u32,
    },
    /// A named entry in the process-wide handler registry, populated at startup.
    Registry { key: String },
}

/// One tool, prompt or resource, as declared in configuration. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: InputSchema,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<HandlerSpec>,
    /// Prompt template with `{argument}` placeholders. Prompts only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Static body for handler-less resources. Resources only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Resource URI; defaults to `resource://<name>`. Resources only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default = "default_handler_timeout")]
    pub timeout_ms: u64,
}

impl CapabilityDeclaration {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The URI under which a resource declaration is served.
    pub fn resource_uri(&self) -> String {
        self.uri
            .clone()
            .unwrap_or_else(|| format!("resource://{}", self.name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    /// Development configurations may mark themselves permissive explicitly; there is no
    /// implicit wildcard.
    pub development: bool,
}

impl CorsConfig {
    /// The `Access-Control-Allow-Origin` value for a given request origin, if CORS is
    /// enabled and the origin is allowed.
    pub fn allow_origin(&self, origin: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        if self.development {
            return Some("*".to_string());
        }
        self.allowed_origins
            .iter()
            .find(|allowed| allowed.as_str() == origin)
            .cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Bucket capacity: the burst a single client identity may spend at once.
    pub capacity: u32,
    /// Tokens restored per second.
    pub refill_per_second: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessControlConfig {
    /// When present, only these capability names may be invoked.
    pub allow: Option<Vec<String>>,
    /// Always rejected, even if allowed above.
    pub deny: Vec<String>,
    /// Per-API-key overrides, keyed by API key.
    pub per_key: BTreeMap<String, AccessRules>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessRules {
    pub allow: Option<Vec<String>>,
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    /// When non-empty, every HTTP/SSE request must present one of these keys.
    pub api_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_control: Option<AccessControlConfig>,
}

/// The full configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tools: Vec<CapabilityDeclaration>,
    #[serde(default)]
    pub prompts: Vec<CapabilityDeclaration>,
    #[serde(default)]
    pub resources: Vec<CapabilityDeclaration>,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    /// Idle session lifetime, in seconds.
    #[serde(default = "default_session_timeout")]
    pub session_timeout: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl ServerConfig {
    /// Load and validate a configuration document from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse and validate a configuration document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }

    /// Check the document for structural problems, reporting all of them together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("server name must not be empty".to_string());
        }
        if self.session_timeout == 0 {
            problems.push("sessionTimeout must be greater than zero".to_string());
        }
        if self.max_sessions == 0 {
            problems.push("maxSessions must be greater than zero".to_string());
        }
        if let Some(rate) = &self.security.rate_limit {
            if rate.capacity == 0 {
                problems.push("security.rateLimit.capacity must be greater than zero".to_string());
            }
            if rate.refill_per_second <= 0.0 {
                problems.push(
                    "security.rateLimit.refillPerSecond must be greater than zero".to_string(),
                );
            }
        }

        check_declarations("tools", &self.tools, &mut problems);
        check_declarations("prompts", &self.prompts, &mut problems);
        check_declarations("resources", &self.resources, &mut problems);

        for decl in &self.tools {
            if decl.handler.is_none() {
                problems.push(format!("tools.{}: a tool must declare a handler", decl.name));
            }
        }
        for decl in &self.prompts {
            if decl.handler.is_none() && decl.template.is_none() {
                problems.push(format!(
                    "prompts.{}: a prompt must declare a template or a handler",
                    decl.name
                ));
            }
        }
        for decl in &self.resources {
            if decl.handler.is_none() && decl.text.is_none() {
                problems.push(format!(
                    "resources.{}: a resource must declare a text body or a handler",
                    decl.name
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }
}

fn check_declarations(section: &str, decls: &[CapabilityDeclaration], problems: &mut Vec<String>) {
    let mut seen = std::collections::BTreeSet::new();
    for decl in decls {
        if decl.name.trim().is_empty() {
            problems.push(format!("{section}: capability name must not be empty"));
            continue;
        }
        if !seen.insert(decl.name.as_str()) {
            problems.push(format!("{section}.{}: duplicate capability name", decl.name));
        }
        if decl.timeout_ms == 0 {
            problems.push(format!(
                "{section}.{}: timeoutMs must be greater than zero",
                decl.name
            ));
        }
        if let Some(handler) = &decl.handler {
            check_handler(section, &decl.name, handler, problems);
        }
        check_schema_patterns(section, &decl.name, &decl.input_schema, problems);
    }
}

fn check_handler(
    section: &str,
    name: &str,
    handler: &HandlerSpec,
    problems: &mut Vec<String>,
) {
    match handler {
        HandlerSpec::File { path, export } => {
            if path.trim().is_empty() {
                problems.push(format!("{section}.{name}: file handler path must not be empty"));
            }
            if export.trim().is_empty() {
                problems.push(format!(
                    "{section}.{name}: file handler export must not be empty"
                ));
            }
        }
        HandlerSpec::Inline { code } => {
            if code.trim().is_empty() {
                problems.push(format!("{section}.{name}: inline handler code must not be empty"));
            }
        }
        HandlerSpec::Http {
            url,
            method,
            timeout_ms,
            ..
        } => {
            match reqwest::Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => problems.push(format!(
                    "{section}.{name}: http handler URL has unsupported scheme '{}'",
                    parsed.scheme()
                )),
                Err(e) => problems.push(format!("{section}.{name}: invalid handler URL: {e}")),
            }
            if !matches!(method.to_ascii_uppercase().as_str(), "GET" | "POST") {
                problems.push(format!(
                    "{section}.{name}: http handler method must be GET or POST"
                ));
            }
            if *timeout_ms == 0 {
                problems.push(format!(
                    "{section}.{name}: http handler timeoutMs must be greater than zero"
                ));
            }
        }
        HandlerSpec::Registry { key } => {
            if key.trim().is_empty() {
                problems.push(format!(
                    "{section}.{name}: registry handler key must not be empty"
                ));
            }
        }
    }
}

/// Regex patterns are used verbatim at validation time, so an unparseable pattern is a
/// configuration problem, caught here rather than per call.
fn check_schema_patterns(
    section: &str,
    name: &str,
    schema: &InputSchema,
    problems: &mut Vec<String>,
) {
    if let Some(pattern) = &schema.pattern {
        if let Err(e) = Regex::new(pattern) {
            problems.push(format!("{section}.{name}: invalid pattern '{pattern}': {e}"));
        }
    }
    if let Some(properties) = &schema.properties {
        for prop in properties.values() {
            check_schema_patterns(section, name, prop, problems);
        }
    }
    if let Some(items) = &schema.items {
        check_schema_patterns(section, name, items, problems);
    }
}

/// The full set of declared capabilities, built once at startup and read-only
/// thereafter. Safe for concurrent reads without locking.
#[derive(Debug, Default)]
pub struct CapabilityCatalog {
    tools: BTreeMap<String, Arc<CapabilityDeclaration>>,
    prompts: BTreeMap<String, Arc<CapabilityDeclaration>>,
    resources_by_uri: BTreeMap<String, Arc<CapabilityDeclaration>>,
}

impl CapabilityCatalog {
    pub fn from_config(config: &ServerConfig) -> Self {
        let index = |decls: &[CapabilityDeclaration]| {
            decls
                .iter()
                .map(|decl| (decl.name.clone(), Arc::new(decl.clone())))
                .collect::<BTreeMap<_, _>>()
        };
        let resources_by_uri = config
            .resources
            .iter()
            .map(|decl| (decl.resource_uri(), Arc::new(decl.clone())))
            .collect();
        Self {
            tools: index(&config.tools),
            prompts: index(&config.prompts),
            resources_by_uri,
        }
    }

    pub fn tool(&self, name: &str) -> Option<&Arc<CapabilityDeclaration>> {
        self.tools.get(name)
    }

    pub fn prompt(&self, name: &str) -> Option<&Arc<CapabilityDeclaration>> {
        self.prompts.get(name)
    }

    pub fn resource_by_uri(&self, uri: &str) -> Option<&Arc<CapabilityDeclaration>> {
        self.resources_by_uri.get(uri)
    }

    pub fn tools(&self) -> impl Iterator<Item = &Arc<CapabilityDeclaration>> {
        self.tools.values()
    }

    pub fn prompts(&self) -> impl Iterator<Item = &Arc<CapabilityDeclaration>> {
        self.prompts.values()
    }

    pub fn resources(&self) -> impl Iterator<Item = &Arc<CapabilityDeclaration>> {
        self.resources_by_uri.values()
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    pub fn has_prompts(&self) -> bool {
        !self.prompts.is_empty()
    }

    pub fn has_resources(&self) -> bool {
        !self.resources_by_uri.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_spec_tagged_union() {
        let spec: HandlerSpec = serde_json::from_str(
            r#"{"kind": "http", "url": "https://example.com/run", "retries": 2}"#,
        )
        .unwrap();
        match spec {
            HandlerSpec::Http {
                url,
                method,
                timeout_ms,
                retries,
            } => {
                assert_eq!(url, "https://example.com/run");
                assert_eq!(method, "POST");
                assert_eq!(timeout_ms, 10_000);
                assert_eq!(retries, 2);
            }
            _ => panic!("expected http handler"),
        }

        let spec: HandlerSpec = serde_json::from_str(r#"{"kind": "file", "path": "handlers.sb"}"#).unwrap();
        assert_eq!(
            spec,
            HandlerSpec::File {
                path: "handlers.sb".to_string(),
                export: "default".to_string()
            }
        );
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = ServerConfig::from_json(
            r#"{
                "name": "demo",
                "version": "0.1.0",
                "tools": [{
                    "name": "echo",
                    "handler": { "kind": "inline", "code": "input" }
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.session_timeout, 3600);
        assert_eq!(config.tools[0].timeout_ms, 5000);
    }

    #[test]
    fn all_problems_reported_together() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "name": "",
                "version": "0.1.0",
                "tools": [
                    { "name": "a", "timeoutMs": 0 },
                    { "name": "a", "handler": { "kind": "registry", "key": "x" } },
                    { "name": "bad-url", "handler": { "kind": "http", "url": "ftp://example.com" } }
                ]
            }"#,
        )
        .unwrap();
        match config.validate() {
            Err(ConfigError::Invalid { problems }) => {
                assert!(problems.len() >= 4, "got: {problems:?}");
                assert!(problems.iter().any(|p| p.contains("server name")));
                assert!(problems.iter().any(|p| p.contains("timeoutMs")));
                assert!(problems.iter().any(|p| p.contains("duplicate")));
                assert!(problems.iter().any(|p| p.contains("scheme")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn invalid_pattern_rejected_at_startup() {
        let result = ServerConfig::from_json(
            r#"{
                "name": "demo",
                "version": "0.1.0",
                "tools": [{
                    "name": "echo",
                    "handler": { "kind": "inline", "code": "input" },
                    "inputSchema": {
                        "type": "object",
                        "properties": { "id": { "type": "string", "pattern": "[unclosed" } }
                    }
                }]
            }"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn resource_uri_defaults_to_name() {
        let decl = CapabilityDeclaration {
            name: "greeting".to_string(),
            description: String::new(),
            input_schema: InputSchema::default(),
            handler: None,
            template: None,
            text: Some("hello".to_string()),
            uri: None,
            mime_type: None,
            timeout_ms: 5000,
        };
        assert_eq!(decl.resource_uri(), "resource://greeting");
    }

    #[test]
    fn catalog_indexes_resources_by_uri() {
        let config = ServerConfig::from_json(
            r#"{
                "name": "demo",
                "version": "0.1.0",
                "resources": [{ "name": "greeting", "text": "hello" }]
            }"#,
        )
        .unwrap();
        let catalog = CapabilityCatalog::from_config(&config);
        assert!(catalog.resource_by_uri("resource://greeting").is_some());
        assert!(catalog.resource_by_uri("resource://missing").is_none());
    }
}
