//! Transport abstraction traits for hiscore.
//!
//! These traits define the interface that all transport implementations must
//! provide, allowing the hub to be transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// A frame received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Bytes),
    /// A transport-level keepalive probe from the peer.
    Ping,
    /// A transport-level keepalive acknowledgment from the peer.
    Pong,
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Inbound frame exceeded the configured limit.
    #[error("Frame of {0} bytes exceeds the read limit")]
    FrameTooLarge(usize),

    /// Outbound payload was not valid UTF-8.
    #[error("Text frame is not valid UTF-8")]
    InvalidUtf8,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// The receiving half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;
}

/// The sending half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one text frame.
    async fn send_text(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Send a transport-level keepalive probe.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Send a close frame and shut the sending side down.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An accepted connection, not yet split.
pub trait Connection: Send {
    /// Split into independently owned writer and reader halves.
    fn split(self: Box<Self>) -> (Box<dyn FrameWriter>, Box<dyn FrameReader>);

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// Convert an outbound payload into the `String` text frames require.
pub(crate) fn into_text(data: Bytes) -> Result<String, TransportError> {
    String::from_utf8(data.to_vec()).map_err(|_| TransportError::InvalidUtf8)
}

/// Reject inbound frames above `limit` bytes.
pub(crate) fn check_size(len: usize, limit: usize) -> Result<(), TransportError> {
    if len > limit {
        tracing::warn!(size = len, limit, "Inbound frame too large");
        return Err(TransportError::FrameTooLarge(len));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_text() {
        assert_eq!(into_text(Bytes::from_static(b"{}")).unwrap(), "{}");
        assert!(matches!(
            into_text(Bytes::from_static(&[0xff, 0xfe])),
            Err(TransportError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_check_size() {
        assert!(check_size(10, 10).is_ok());
        assert!(matches!(
            check_size(11, 10),
            Err(TransportError::FrameTooLarge(11))
        ));
    }
}
