pub mod content;
pub use content::{Content, ImageContent, TextContent};
pub mod jsonrpc;
pub mod messages;
pub mod prompt;
pub mod resource;
pub mod tool;
