//! In-memory transport.
//!
//! A [`MemoryConnection`] behaves like a socket whose far end is a
//! [`MemoryPeer`] held by the caller. Used to drive clients in tests and
//! benchmarks without the network.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{Connection, FrameReader, FrameWriter, Inbound, TransportError};

/// A frame written by the local side, as observed by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame.
    Text(Bytes),
    /// A keepalive probe.
    Ping,
    /// A close frame.
    Close,
}

impl Outbound {
    /// Text content of a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Outbound::Text(data) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }
}

type InboundItem = Result<Inbound, TransportError>;

/// Create a connected connection/peer pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    (
        MemoryConnection {
            inbound: inbound_rx,
            outbound: outbound_tx,
        },
        MemoryPeer {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
        },
    )
}

/// The local end of an in-memory connection.
pub struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<InboundItem>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Connection for MemoryConnection {
    fn split(self: Box<Self>) -> (Box<dyn FrameWriter>, Box<dyn FrameReader>) {
        let MemoryConnection { inbound, outbound } = *self;
        (
            Box::new(MemoryWriter { outbound }),
            Box::new(MemoryReader { inbound }),
        )
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<InboundItem>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        match self.inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

struct MemoryWriter {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl MemoryWriter {
    fn push(&self, frame: Outbound) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send_text(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.push(Outbound::Text(data))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.push(Outbound::Ping)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Closing twice, or after the peer went away, is fine.
        let _ = self.push(Outbound::Close);
        Ok(())
    }
}

/// The far end of an in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<InboundItem>>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl MemoryPeer {
    fn push(&self, item: InboundItem) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(item).is_ok())
    }

    /// Send a text frame. Returns `false` if the local side is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(Ok(Inbound::Text(text.into())))
    }

    /// Send a binary frame.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.push(Ok(Inbound::Binary(data.into())))
    }

    /// Send a keepalive probe.
    pub fn send_ping(&self) -> bool {
        self.push(Ok(Inbound::Ping))
    }

    /// Acknowledge a keepalive probe.
    pub fn send_pong(&self) -> bool {
        self.push(Ok(Inbound::Pong))
    }

    /// Make the next read on the local side fail.
    pub fn fail(&self, error: TransportError) -> bool {
        self.push(Err(error))
    }

    /// Close the peer's sending side; the local reader sees end of stream.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Wait for the next frame written by the local side.
    ///
    /// Returns `None` once the local writer has been dropped.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Take a frame if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }
}
