//! Adapter for WebSockets upgraded by axum.
//!
//! The HTTP server performs the upgrade; this wraps the resulting socket so
//! the hub can drive it through [`Connection`].

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::debug;

use crate::traits::{
    check_size, into_text, Connection, FrameReader, FrameWriter, Inbound, TransportError,
};

/// An axum WebSocket connection.
pub struct AxumConnection {
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
}

impl AxumConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket, remote_addr: Option<SocketAddr>, max_message_size: usize) -> Self {
        Self {
            socket,
            remote_addr,
            max_message_size,
        }
    }
}

impl Connection for AxumConnection {
    fn split(self: Box<Self>) -> (Box<dyn FrameWriter>, Box<dyn FrameReader>) {
        let AxumConnection {
            socket,
            max_message_size,
            ..
        } = *self;
        let (sink, stream) = socket.split();
        (
            Box::new(AxumWriter { sink }),
            Box::new(AxumReader {
                stream,
                max_message_size,
            }),
        )
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

struct AxumReader {
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

#[async_trait]
impl FrameReader for AxumReader {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => {
                check_size(text.len(), self.max_message_size)?;
                Ok(Some(Inbound::Text(text)))
            }
            Some(Ok(Message::Binary(data))) => {
                check_size(data.len(), self.max_message_size)?;
                Ok(Some(Inbound::Binary(Bytes::from(data))))
            }
            // axum answers pings on the next flush
            Some(Ok(Message::Ping(_))) => Ok(Some(Inbound::Ping)),
            Some(Ok(Message::Pong(_))) => Ok(Some(Inbound::Pong)),
            Some(Ok(Message::Close(_))) => {
                debug!("Received close frame");
                Ok(None)
            }
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }
}

struct AxumWriter {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameWriter for AxumWriter {
    async fn send_text(&mut self, data: Bytes) -> Result<(), TransportError> {
        let text = into_text(data)?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // The peer may already be gone; a failed close is not worth reporting.
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
        Ok(())
    }
}
