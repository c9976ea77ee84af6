use crate::transport::{MessageParseError, TransportError};
use futures::{SinkExt, StreamExt};
use std::convert::Infallible;
use switchboard_mcp_protocol::jsonrpc::{
    ErrorCode, ErrorData, Request, RequestId, Response, ResponseItem, SendableMessage,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tower::Service;

#[inline]
fn parse_message(line: Result<String, LinesCodecError>) -> Result<Request, MessageParseError> {
    let line = line?;
    serde_json::from_str::<Request>(&line).map_err(MessageParseError::Deserialisation)
}

/// Write a JSON-RPC response on the transport.
#[inline]
async fn write_message<T>(
    frame: &mut Framed<T, LinesCodec>,
    msg: Response,
) -> Result<(), TransportError>
where
    T: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(&msg)?;
    frame.send(json).await?;
    Ok(())
}

/// Run one unit of input (single message or batch) through the service. Notifications
/// produce no output; a batch of only notifications produces an empty response.
async fn process_request<S>(service: &mut S, request: Request) -> Response
where
    S: Service<SendableMessage, Response = Option<ResponseItem>, Error = Infallible>,
{
    match request {
        Request::Single(msg) => Response::Single(
            service
                .call(msg)
                .await
                .expect("MCP service is infallible"),
        ),
        Request::Batch(messages) => {
            let mut items = Vec::with_capacity(messages.len());
            for msg in messages {
                if let Some(item) = service
                    .call(msg)
                    .await
                    .expect("MCP service is infallible")
                {
                    items.push(item);
                }
            }
            Response::Batch(items)
        }
    }
}

async fn handle_connection<S, T>(mut service: S, transport: T) -> Result<(), TransportError>
where
    S: Service<SendableMessage, Response = Option<ResponseItem>, Error = Infallible>,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut frame = Framed::new(transport, LinesCodec::new());

    // Process the stream in lines indefinitely, until the connection closes
    while let Some(line) = frame.next().await {
        match parse_message(line) {
            Ok(request) => {
                let response = process_request(&mut service, request).await;
                if !response.is_empty() {
                    if let Err(e) = write_message(&mut frame, response).await {
                        tracing::error!(error = ?e, "Error writing response over transport");
                    }
                }
            }
            Err(MessageParseError::Deserialisation(e)) => {
                // Per the JSON-RPC spec, unparseable input gets a parse error response
                // with a null ID.
                tracing::debug!(error = ?e, "Failed to parse incoming message");
                let error_data = ErrorData::new(
                    ErrorCode::ParseError,
                    "JSON parsing error when deserialising the message".to_string(),
                );
                let msg = ResponseItem::error(RequestId::Null, error_data);
                write_message(&mut frame, Response::Single(Some(msg))).await?;
            }
            Err(MessageParseError::LinesCodecError(e)) => {
                // Framing error. Don't terminate the connection: we continue looping
                tracing::error!(error = ?e, "Transport error");
            }
        }
    }

    Ok(())
}

/// Serve an MCP service over a newline-delimited JSON transport (typically stdio).
pub async fn serve<S, T>(service: S, transport: T) -> Result<(), TransportError>
where
    S: Service<SendableMessage, Response = Option<ResponseItem>, Error = Infallible>
        + Clone
        + 'static,
    T: AsyncRead + AsyncWrite + Unpin,
{
    handle_connection(service, transport).await
}
