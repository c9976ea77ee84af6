use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Metadata describing a tool exposed by the MCP server.
/// A tool is like an RPC method and can be called by a model, either to fetch data, or
/// perform side effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// The name of the tool. Unique within a server.
    pub name: String,
    /// A description of what the tool does.
    pub description: String,
    /// A JSON Schema object defining the expected parameters.
    pub input_schema: Value,
}

impl Tool {
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Errors that can be raised while servicing a tool call.
#[derive(Error, Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Execution failed: {0}")]
    ExecutionError(String),
    #[error("Unknown tool: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_wire_shape() {
        let tool = Tool::new(
            "calculate",
            "Perform basic arithmetic",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string", "enum": ["add", "subtract", "multiply", "divide"] },
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["operation", "a", "b"]
            }),
        );
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["name"], "calculate");
        assert_eq!(value["inputSchema"]["type"], "object");
        assert!(value["inputSchema"]["properties"]["a"].is_object());
    }
}
