//! Client sessions.
//!
//! A session pairs one transport connection with the hub. It runs two
//! tasks:
//!
//! - the read loop decodes inbound frames, answers pings, turns
//!   subscribe/unsubscribe requests into hub commands and enforces the
//!   keepalive deadline;
//! - the write loop drains the client's outbound queue to the transport,
//!   coalescing whatever is already queued into one frame, and sends a
//!   keepalive probe on every tick.
//!
//! The hub owns the only producer of the outbound queue. When the hub drops
//! it (on unregister or eviction) the write loop sends a close frame and
//! exits. The read loop only holds a weak producer for its own replies.
//!
//! A failed or timed out write is fatal to the whole session: the write
//! loop unregisters the client and stops the read loop.

use bytes::{BufMut, Bytes, BytesMut};
use hiscore_protocol::codec::{self, BATCH_SEPARATOR};
use hiscore_protocol::{Envelope, ErrorCode, Message};
use hiscore_transport::{Connection, FrameReader, FrameWriter, Inbound};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use crate::client::{outbound_queue, ClientHandle, ClientId, ClientState, Lifecycle};
use crate::hub::{Hub, HubError};
use crate::topic::{validate_topic_name, TopicName};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outbound queue capacity. A client whose queue fills up is evicted.
    pub outbound_capacity: usize,
    /// Interval between keepalive probes. Must be shorter than `pong_wait`.
    pub ping_interval: Duration,
    /// How long to wait for a keepalive acknowledgement.
    pub pong_wait: Duration,
    /// Deadline for a single frame write.
    pub write_wait: Duration,
    /// Maximum topics a single client may subscribe to.
    pub max_topics: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            ping_interval: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_topics: 100,
        }
    }
}

/// A running client session.
pub struct ClientSession {
    id: ClientId,
    lifecycle: Arc<Lifecycle>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ClientSession {
    /// Register a new client with the hub and start its loops.
    ///
    /// The client's first outbound message is a `CONNECTED` envelope naming
    /// its ID and the given game list.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped. The connection
    /// is dropped in that case.
    pub async fn start(
        hub: Hub,
        connection: Box<dyn Connection>,
        games: Vec<String>,
        config: SessionConfig,
    ) -> Result<Self, HubError> {
        let id = ClientId::generate();
        let lifecycle = Arc::new(Lifecycle::new());
        let (tx, rx) = outbound_queue(config.outbound_capacity);

        // Queued before registration so it precedes any broadcast.
        match codec::encode(&Envelope::connected(id.as_str(), games)) {
            Ok(frame) => {
                let _ = tx.try_send(frame);
            }
            Err(e) => warn!(client = %id, error = %e, "Failed to encode greeting"),
        }

        let weak = tx.downgrade();
        hub.register(ClientHandle::new(id.clone(), tx)).await?;
        lifecycle.advance(ClientState::Registered);
        info!(client = %id, remote = ?connection.remote_addr(), "Client connected");

        let (writer, reader) = connection.split();
        let halt = Arc::new(Notify::new());

        let write_loop = WriteLoop {
            id: id.clone(),
            hub: hub.clone(),
            writer,
            outbound: rx,
            config: config.clone(),
            lifecycle: Arc::clone(&lifecycle),
            halt: Arc::clone(&halt),
        };
        let read_loop = ReadLoop {
            id: id.clone(),
            hub,
            reader,
            replies: weak,
            topics: HashSet::new(),
            config,
            lifecycle: Arc::clone(&lifecycle),
            halt,
        };

        Ok(Self {
            id,
            lifecycle,
            writer: tokio::spawn(write_loop.run()),
            reader: tokio::spawn(read_loop.run()),
        })
    }

    /// The client's ID.
    #[must_use]
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.lifecycle.state()
    }

    /// Wait for both loops to finish.
    pub async fn wait(self) {
        let _ = self.reader.await;
        let _ = self.writer.await;
    }
}

struct ReadLoop {
    id: ClientId,
    hub: Hub,
    reader: Box<dyn FrameReader>,
    replies: mpsc::WeakSender<Bytes>,
    topics: HashSet<TopicName>,
    config: SessionConfig,
    lifecycle: Arc<Lifecycle>,
    halt: Arc<Notify>,
}

impl ReadLoop {
    async fn run(mut self) {
        let mut deadline = Instant::now() + self.config.pong_wait;

        loop {
            let received = tokio::select! {
                received = time::timeout_at(deadline, self.reader.recv()) => received,
                () = self.halt.notified() => {
                    debug!(client = %self.id, "Write side closed");
                    break;
                }
            };
            let frame = match received {
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => {
                    debug!(client = %self.id, "Peer closed connection");
                    break;
                }
                Ok(Err(e)) => {
                    debug!(client = %self.id, error = %e, "Read failed");
                    break;
                }
                Err(_) => {
                    warn!(client = %self.id, "Keepalive deadline exceeded");
                    break;
                }
            };

            let handled = match frame {
                Inbound::Text(text) => self.handle_frame(text.as_bytes()).await,
                Inbound::Binary(data) => self.handle_frame(&data).await,
                Inbound::Pong => {
                    deadline = Instant::now() + self.config.pong_wait;
                    Ok(())
                }
                Inbound::Ping => Ok(()),
            };
            if handled.is_err() {
                debug!(client = %self.id, "Hub stopped");
                break;
            }
        }

        let _ = self.hub.unregister(&self.id).await;
        self.lifecycle.loop_finished();
        info!(client = %self.id, "Client disconnected");
    }

    async fn handle_frame(&mut self, data: &[u8]) -> Result<(), HubError> {
        let envelope = match codec::decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(client = %self.id, error = %e, "Failed to parse message");
                self.reply(&Envelope::error(
                    ErrorCode::ParseError,
                    "Failed to parse message",
                ));
                return Ok(());
            }
        };

        match envelope.into_message() {
            Message::Subscribe(game) => self.subscribe(game).await,
            Message::Unsubscribe(game) => self.unsubscribe(game).await,
            Message::Ping => {
                self.reply(&Envelope::pong());
                Ok(())
            }
            other => {
                trace!(client = %self.id, kind = other.type_name(), "Ignoring message");
                Ok(())
            }
        }
    }

    async fn subscribe(&mut self, game: String) -> Result<(), HubError> {
        if let Err(reason) = validate_topic_name(&game) {
            self.reply(&Envelope::error(ErrorCode::InvalidGame, reason));
            return Ok(());
        }
        if !self.topics.contains(&game) && self.topics.len() >= self.config.max_topics {
            self.reply(&Envelope::error(
                ErrorCode::TooManySubscriptions,
                format!("Subscription limit of {} reached", self.config.max_topics),
            ));
            return Ok(());
        }

        self.topics.insert(game.clone());
        self.hub.subscribe(&self.id, game).await
    }

    async fn unsubscribe(&mut self, game: String) -> Result<(), HubError> {
        if game.is_empty() {
            return Ok(());
        }
        self.topics.remove(&game);
        self.hub.unsubscribe(&self.id, game).await
    }

    /// Queue a direct reply. Dropped if the queue is full or already closed.
    fn reply(&self, envelope: &Envelope) {
        let frame = match codec::encode(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(client = %self.id, error = %e, "Failed to encode reply");
                return;
            }
        };
        let Some(tx) = self.replies.upgrade() else {
            return;
        };
        if let Err(TrySendError::Full(_)) = tx.try_send(frame) {
            debug!(client = %self.id, "Outbound queue full, dropping reply");
        }
    }
}

struct WriteLoop {
    id: ClientId,
    hub: Hub,
    writer: Box<dyn FrameWriter>,
    outbound: mpsc::Receiver<Bytes>,
    config: SessionConfig,
    lifecycle: Arc<Lifecycle>,
    halt: Arc<Notify>,
}

impl WriteLoop {
    async fn run(mut self) {
        let period = self.config.ping_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        let write_wait = self.config.write_wait;

        loop {
            tokio::select! {
                next = self.outbound.recv() => {
                    let Some(first) = next else {
                        debug!(client = %self.id, "Outbound queue closed");
                        break;
                    };
                    let frame = self.coalesce(first);
                    match time::timeout(write_wait, self.writer.send_text(frame)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!(client = %self.id, error = %e, "Write failed");
                            break;
                        }
                        Err(_) => {
                            warn!(client = %self.id, "Write timed out");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    match time::timeout(write_wait, self.writer.send_ping()).await {
                        Ok(Ok(())) => trace!(client = %self.id, "Sent keepalive probe"),
                        Ok(Err(e)) => {
                            debug!(client = %self.id, error = %e, "Keepalive probe failed");
                            break;
                        }
                        Err(_) => {
                            warn!(client = %self.id, "Keepalive probe timed out");
                            break;
                        }
                    }
                }
            }
        }

        // No-op when the hub already dropped the client.
        let _ = self.hub.unregister(&self.id).await;
        self.halt.notify_one();
        let _ = time::timeout(write_wait, self.writer.close()).await;
        self.lifecycle.loop_finished();
    }

    /// Join `first` with every message already waiting, newline separated.
    fn coalesce(&mut self, first: Bytes) -> Bytes {
        let mut pending = Vec::new();
        while pending.len() < self.config.outbound_capacity {
            match self.outbound.try_recv() {
                Ok(next) => pending.push(next),
                Err(_) => break,
            }
        }
        if pending.is_empty() {
            return first;
        }

        let len = first.len() + pending.iter().map(|p| p.len() + 1).sum::<usize>();
        let mut frame = BytesMut::with_capacity(len);
        frame.extend_from_slice(&first);
        for next in pending {
            frame.put_u8(BATCH_SEPARATOR);
            frame.extend_from_slice(&next);
        }
        frame.freeze()
    }
}
