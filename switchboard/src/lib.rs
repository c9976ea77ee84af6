//! switchboard is a configuration-driven [Model Context Protocol][mcp-spec] (MCP) server.
//!
//! Instead of compiling capabilities in, every tool, prompt and resource the server
//! exposes is declared in a JSON configuration document and bound at runtime to one of
//! four handler kinds: a definitions file, an inline expression, a remote HTTP endpoint,
//! or a natively registered handler.
//!
//! # Example
//!
//! A minimal server is a configuration document and a transport:
//!
//! ```rust,ignore
//! use switchboard::{serve, MCPServiceBuilder, ServerConfig};
//! use switchboard::transport::stdio_transport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), switchboard::errors::ServerError> {
//!     let config = ServerConfig::load("switchboard.json".as_ref())?;
//!     let service = MCPServiceBuilder::new(config).build();
//!     serve(service, stdio_transport()).await?;
//!     Ok(())
//! }
//! ```
//!
//! with a document like:
//!
//! ```json
//! {
//!   "name": "demo",
//!   "version": "0.1.0",
//!   "tools": [{
//!     "name": "calculate",
//!     "description": "Perform basic arithmetic",
//!     "inputSchema": {
//!       "type": "object",
//!       "properties": {
//!         "operation": { "type": "string", "enum": ["add", "subtract", "multiply", "divide"] },
//!         "a": { "type": "number" },
//!         "b": { "type": "number" }
//!       },
//!       "required": ["operation", "a", "b"]
//!     },
//!     "handler": {
//!       "kind": "inline",
//!       "code": "if(operation == 'add', a + b, if(operation == 'subtract', a - b, if(operation == 'multiply', a * b, a / b)))"
//!     }
//!   }]
//! }
//! ```
//!
//! # Request pipeline
//!
//! Every call runs the same gauntlet, in a fixed order: authentication, origin
//! screening, rate limiting (all in the transport), then access control, argument
//! validation and handler execution (in the dispatcher). Validation failures never
//! reach a handler, and handler deadlines abandon rather than interrupt the running
//! work.
//!
//! # Transports
//!
//! Four transports share one dispatcher: newline-delimited JSON over stdio, stateless
//! HTTP, session-bearing HTTP (`Mcp-Session-Id`), and the legacy SSE pairing of
//! `GET /sse` + `POST /messages`. See [`serve`], [`transport::http`] and
//! [`transport::sse`].
//!
//! # Middleware and layers
//!
//! [`MCPService`] is a [`tower`] `Service`, so anything from the tower ecosystem
//! composes over it; [`middleware::TracingLayer`] is the bundled example.
//!
//! # Logging
//!
//! switchboard uses tokio's tracing throughout. When speaking the stdio transport,
//! stdout belongs to the protocol, so subscribers must write to stderr (or a file).
//!
//! [mcp-spec]: https://modelcontextprotocol.io/specification/2025-03-26/
//! [tower]: https://github.com/tokio-rs/tower

pub mod config;
pub mod context;
pub mod errors;
pub mod handler;
pub mod middleware;
pub mod security;
mod serve;
mod service;
pub mod session;
pub mod transport;
pub mod validation;

pub use config::{CapabilityCatalog, HandlerSpec, ServerConfig};
pub use context::{Caller, ExecutionContext};
pub use serve::serve;
pub use service::{MCPService, MCPServiceBuilder, PROTOCOL_VERSION};

// re-export certain MCP protocol types
pub use switchboard_mcp_protocol::{
    jsonrpc::{Request, Response},
    messages::CallToolResult,
    Content,
};
