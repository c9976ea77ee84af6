use thiserror::Error;

/// Errors raised by a transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("LinesCodecError error: {0}")]
    LinesCodecError(#[from] tokio_util::codec::LinesCodecError),
}

/// Errors raised while turning one line/body of input into a JSON-RPC request.
#[derive(Error, Debug)]
pub enum MessageParseError {
    #[error("JSON deserialisation error: {0}")]
    Deserialisation(serde_json::Error),

    #[error("Line framing error: {0}")]
    LinesCodecError(#[from] tokio_util::codec::LinesCodecError),
}

pub mod http;
pub mod sse;

/// The duplex the stdio transport serves on.
///
/// Protocol traffic owns stdout exclusively; anything else written there (including
/// logs) would corrupt the stream, which is why logging goes to stderr.
pub type StdioTransport = tokio::io::Join<tokio::io::Stdin, tokio::io::Stdout>;

pub fn stdio_transport() -> StdioTransport {
    tokio::io::join(tokio::io::stdin(), tokio::io::stdout())
}
