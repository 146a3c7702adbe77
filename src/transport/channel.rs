use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{CloseCode, Inbound, Transport, TransportError};

const CHANNEL_CAPACITY: usize = 64;

// -----------------------------------------------------------------------------
// ----- Outbound --------------------------------------------------------------

/// What the gateway sent, as seen by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

// -----------------------------------------------------------------------------
// ----- ChannelTransport ------------------------------------------------------

/// In-memory transport, for embedding the gateway without a socket.
#[derive(Debug)]
pub struct ChannelTransport {
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: bool,
}

/// The client end of a [`ChannelTransport`].
#[derive(Debug)]
pub struct ChannelPeer {
    inbound: mpsc::Sender<Inbound>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

pub fn channel_pair() -> (ChannelTransport, ChannelPeer) {
    let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let transport = ChannelTransport {
        inbound: in_rx,
        outbound: out_tx,
        closed: false,
    };
    let peer = ChannelPeer {
        inbound: in_tx,
        outbound: out_rx,
    };

    (transport, peer)
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.inbound.recv().await)
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        self.inbound.close();
        // peer may already be gone; closing is still complete on our side
        let _ = self.outbound.send(Outbound::Close {
            code: code.as_u16(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- ChannelPeer -----------------------------------------------------------

impl ChannelPeer {
    /// Returns false once the gateway side has closed.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.inbound.send(Inbound::Text(text.into())).await.is_ok()
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.inbound.send(Inbound::Binary(data.into())).await.is_ok()
    }

    /// Next message from the gateway, `None` once the transport is dropped.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Drain everything already sent, without waiting.
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            out.push(message);
        }
        out
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
