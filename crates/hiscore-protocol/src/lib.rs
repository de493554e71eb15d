//! # hiscore-protocol
//!
//! Wire protocol definitions for the hiscore realtime hub.
//!
//! Every message exchanged with a client is a JSON envelope:
//!
//! ```text
//! { "type": "SCORE_UPDATE", "payload": { ... }, "timestamp": "2024-05-01T12:00:00Z" }
//! ```
//!
//! ## Message Kinds
//!
//! - `SUBSCRIBE` / `UNSUBSCRIBE` / `PING` - sent by clients
//! - `CONNECTED` / `SCORE_UPDATE` / `LEADERBOARD_UPDATE` / `PONG` / `ERROR` - sent by the server
//!
//! ## Example
//!
//! ```rust
//! use hiscore_protocol::{codec, Envelope, Message};
//!
//! let envelope = Envelope::subscribe("Tetris");
//!
//! let encoded = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.message(), &Message::Subscribe("Tetris".into()));
//! ```

pub mod codec;
pub mod envelope;
pub mod payloads;

pub use codec::{decode, encode, split_batch, ProtocolError};
pub use envelope::{Envelope, Message, MessageKind};
pub use payloads::{
    ConnectedPayload, ErrorCode, ErrorPayload, LeaderboardUpdatePayload, ScoreEntry,
    ScoreUpdatePayload, SubscribePayload,
};
