use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// A known resource that the server is capable of reading. This struct provides metadata
/// about resources in list calls; contents are provided by [`ResourceContents`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// The URI of this resource. Common schemes include `https`, `file` and `resource`.
    pub uri: String,
    /// A human-readable name for this resource.
    pub name: String,
    /// Optional description; a hint to the model about what the resource contains.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The MIME type of this resource, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Resource {
    /// Creates a new Resource from a URI. The URI must parse; the name falls back to the
    /// last path segment when not provided.
    pub fn new<S: Into<String>>(
        uri: S,
        mime_type: Option<String>,
        name: Option<String>,
    ) -> Result<Self, ResourceError> {
        let uri = uri.into();
        let url =
            Url::parse(&uri).map_err(|e| ResourceError::InvalidUri(uri.clone(), e.to_string()))?;

        let name = match name {
            Some(n) => n,
            None => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|segment| !segment.is_empty())
                .or_else(|| url.host_str())
                .ok_or_else(|| {
                    ResourceError::InvalidUri(
                        uri.clone(),
                        "Could not extract name from URI".to_string(),
                    )
                })?
                .to_string(),
        };

        Ok(Self {
            uri,
            name,
            description: None,
            mime_type,
        })
    }
}

/// The contents of a resource, identified by the `uri` field in [`Resource`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", untagged)]
pub enum ResourceContents {
    /// UTF-8 encoded text data: source code, config, logs, JSON, plain text.
    TextResourceContents {
        uri: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        text: String,
    },
    /// Raw binary data, base64 encoded.
    BlobResourceContents {
        uri: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        blob: String,
    },
}

impl ResourceContents {
    pub fn text<U: Into<String>, T: Into<String>>(uri: U, mime_type: Option<String>, text: T) -> Self {
        ResourceContents::TextResourceContents {
            uri: uri.into(),
            mime_type,
            text: text.into(),
        }
    }

    /// Binary contents, base64 encoding the raw bytes.
    pub fn blob<U: Into<String>>(uri: U, mime_type: Option<String>, bytes: &[u8]) -> Self {
        ResourceContents::BlobResourceContents {
            uri: uri.into(),
            mime_type,
            blob: BASE64.encode(bytes),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Execution failed: {0}")]
    ExecutionError(String),
    #[error("Unknown resource: {0}")]
    NotFound(String),
    #[error("Invalid URI: {0}. Error: {1}")]
    InvalidUri(String, String),
}
