//! Codec for encoding and decoding hiscore envelopes.
//!
//! Envelopes travel as JSON objects inside WebSocket text frames. The server
//! may coalesce several envelopes into one frame, separated by `\n`; see
//! [`split_batch`].

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::{self, Envelope, Message, MessageKind};
use crate::payloads::SubscribePayload;

/// Maximum size of a single inbound message (512 KiB).
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024;

/// Separator between envelopes coalesced into one frame.
pub const BATCH_SEPARATOR: u8 = b'\n';

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    TooLarge(usize),

    /// Not a JSON envelope at all.
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Known `type` with a payload that does not fit it.
    #[error("Invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },

    /// `timestamp` is present but not RFC3339.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

#[derive(Serialize)]
struct WireOut<'a, P: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a P>,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GameRef<'a> {
    game_name: &'a str,
}

#[derive(Deserialize)]
struct WireIn {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<serde_json::Value>,
    #[serde(default)]
    timestamp: Option<String>,
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn write<P: Serialize>(
    kind: &str,
    payload: Option<&P>,
    timestamp: &DateTime<Utc>,
) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&WireOut {
        kind,
        payload,
        timestamp: format_timestamp(timestamp),
    })
}

/// Encode an envelope to JSON bytes.
///
/// Encoding is pure: the same envelope always yields the same bytes.
/// [`MAX_MESSAGE_SIZE`] bounds what peers may send, not what the server
/// publishes, so large leaderboards encode in full.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let timestamp = envelope.timestamp();
    let message = envelope.message();
    let kind = message.type_name();

    let data = match message {
        Message::ScoreUpdate(payload) => write(kind, Some(payload), &timestamp),
        Message::LeaderboardUpdate(payload) => write(kind, Some(payload), &timestamp),
        Message::Subscribe(game_name) | Message::Unsubscribe(game_name) => {
            write(kind, Some(&GameRef { game_name }), &timestamp)
        }
        Message::Error(payload) => write(kind, Some(payload), &timestamp),
        Message::Connected(payload) => write(kind, Some(payload), &timestamp),
        Message::Ping | Message::Pong | Message::Unrecognized(_) => {
            write::<()>(kind, None, &timestamp)
        }
    }?;

    Ok(Bytes::from(data))
}

fn payload<T: DeserializeOwned>(
    kind: MessageKind,
    value: Option<serde_json::Value>,
) -> Result<T, ProtocolError> {
    serde_json::from_value(value.unwrap_or(serde_json::Value::Null))
        .map_err(|source| ProtocolError::InvalidPayload { kind, source })
}

fn game_name(kind: MessageKind, value: Option<serde_json::Value>) -> Result<String, ProtocolError> {
    match value {
        None => Ok(String::new()),
        Some(value) => payload::<SubscribePayload>(kind, Some(value)).map(|p| p.game_name),
    }
}

fn decode_message(
    kind: MessageKind,
    value: Option<serde_json::Value>,
) -> Result<Message, ProtocolError> {
    let message = match kind {
        MessageKind::ScoreUpdate => Message::ScoreUpdate(payload(kind, value)?),
        MessageKind::LeaderboardUpdate => Message::LeaderboardUpdate(payload(kind, value)?),
        MessageKind::Subscribe => Message::Subscribe(game_name(kind, value)?),
        MessageKind::Unsubscribe => Message::Unsubscribe(game_name(kind, value)?),
        MessageKind::Ping => Message::Ping,
        MessageKind::Pong => Message::Pong,
        MessageKind::Error => Message::Error(payload(kind, value)?),
        MessageKind::Connected => Message::Connected(payload(kind, value)?),
    };
    Ok(message)
}

/// Decode an envelope from JSON bytes.
///
/// An unknown `type` is not an error: it decodes to
/// [`Message::Unrecognized`]. A missing `timestamp` is stamped with the
/// current time.
///
/// # Errors
///
/// Returns an error if the data is too large, not a JSON envelope, or carries
/// a payload that does not match its `type`.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(data.len()));
    }

    let wire: WireIn = serde_json::from_slice(data)?;

    let timestamp = match wire.timestamp {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map_err(|_| ProtocolError::InvalidTimestamp(raw.clone()))?
            .with_timezone(&Utc),
        None => envelope::now(),
    };

    let message = match wire.kind.parse::<MessageKind>() {
        Ok(kind) => decode_message(kind, wire.payload)?,
        Err(raw) => Message::Unrecognized(raw),
    };

    Ok(Envelope::at(message, timestamp))
}

/// Decode an envelope from a string.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_str(text: &str) -> Result<Envelope, ProtocolError> {
    decode(text.as_bytes())
}

/// Split a frame that may hold several newline-joined envelopes.
pub fn split_batch(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split(BATCH_SEPARATOR as char)
        .filter(|line| !line.trim().is_empty())
}
