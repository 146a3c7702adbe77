mod channel;
mod websocket;

pub use channel::{ChannelPeer, ChannelTransport, Outbound, channel_pair};
pub use websocket::{WsTransport, accept};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

// -----------------------------------------------------------------------------
// ----- Inbound ---------------------------------------------------------------

/// A data message from the client. Control frames never surface here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Bytes),
}

impl Inbound {
    pub fn len(&self) -> usize {
        match self {
            Inbound::Text(text) => text.len(),
            Inbound::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// -----------------------------------------------------------------------------
// ----- CloseCode -------------------------------------------------------------

/// WebSocket close statuses the gateway uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    GoingAway,
    PolicyViolation,
    InternalError,
    TryAgainLater,
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::PolicyViolation => 1008,
            CloseCode::InternalError => 1011,
            CloseCode::TryAgainLater => 1013,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Transport -------------------------------------------------------------

/// One bidirectional client connection.
///
/// `recv` must be cancel-safe: the session races it against shutdown signals.
#[async_trait]
pub trait Transport: Send {
    /// Next data message, or `None` once the peer has gone away.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;

    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), TransportError>;
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
