use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    WebSocketStream, accept_async,
    tungstenite::{
        Error as WsError, Message,
        protocol::{CloseFrame, frame::coding::CloseCode as WsCloseCode},
    },
};
use tracing::trace;

use super::{CloseCode, Inbound, Transport, TransportError};

// -----------------------------------------------------------------------------
// ----- WsTransport -----------------------------------------------------------

/// Server side of an upgraded WebSocket over any byte stream (plain TCP or TLS).
pub struct WsTransport<S> {
    stream: WebSocketStream<S>,
}

/// Run the server handshake on `stream`.
pub async fn accept<S>(stream: S) -> Result<WsTransport<S>, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let stream = accept_async(stream).await?;
    Ok(WsTransport { stream })
}

#[async_trait]
impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Ok(None);
            };

            match message {
                Ok(Message::Text(text)) => return Ok(Some(Inbound::Text(text))),
                Ok(Message::Binary(data)) => return Ok(Some(Inbound::Binary(Bytes::from(data)))),
                Ok(Message::Close(frame)) => {
                    trace!(?frame, "peer sent close");
                    return Ok(None);
                }
                // pings are answered by tungstenite on the next read/write
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: WsCloseCode::from(code.as_u16()),
            reason: Cow::Owned(reason.to_string()),
        };

        match self.stream.close(Some(frame)).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
