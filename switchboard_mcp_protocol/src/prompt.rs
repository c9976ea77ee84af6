use crate::content::Content;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata describing a prompt template exposed by the MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// The name of the prompt. Unique within a server.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The arguments the template accepts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<PromptArgument>>,
}

impl Prompt {
    pub fn new<N: Into<String>>(
        name: N,
        description: Option<String>,
        arguments: Option<Vec<PromptArgument>>,
    ) -> Self {
        Prompt {
            name: name.into(),
            description,
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMessageRole {
    User,
    Assistant,
}

/// A single message within a rendered prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptMessageRole,
    pub content: Content,
}

impl PromptMessage {
    pub fn new_text<S: Into<String>>(role: PromptMessageRole, text: S) -> Self {
        PromptMessage {
            role,
            content: Content::text(text),
        }
    }
}

/// Errors that can be raised while servicing a prompt request.
#[derive(Error, Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum PromptError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Unknown prompt: {0}")]
    NotFound(String),
}
