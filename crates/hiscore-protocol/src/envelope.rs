//! Envelope types for the hiscore protocol.
//!
//! An [`Envelope`] wraps one typed [`Message`] and the time it was created.
//! Envelopes are immutable once built; use the constructors below.

use chrono::{DateTime, SubsecRound, Utc};
use std::fmt;
use std::str::FromStr;

use crate::payloads::{
    ConnectedPayload, ErrorCode, ErrorPayload, LeaderboardUpdatePayload, ScoreEntry,
    ScoreUpdatePayload,
};

/// Message kind identifiers, as they appear in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ScoreUpdate,
    LeaderboardUpdate,
    Subscribe,
    Unsubscribe,
    Ping,
    Pong,
    Error,
    Connected,
}

impl MessageKind {
    /// Every known kind.
    pub const ALL: [MessageKind; 8] = [
        MessageKind::ScoreUpdate,
        MessageKind::LeaderboardUpdate,
        MessageKind::Subscribe,
        MessageKind::Unsubscribe,
        MessageKind::Ping,
        MessageKind::Pong,
        MessageKind::Error,
        MessageKind::Connected,
    ];

    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::ScoreUpdate => "SCORE_UPDATE",
            MessageKind::LeaderboardUpdate => "LEADERBOARD_UPDATE",
            MessageKind::Subscribe => "SUBSCRIBE",
            MessageKind::Unsubscribe => "UNSUBSCRIBE",
            MessageKind::Ping => "PING",
            MessageKind::Pong => "PONG",
            MessageKind::Error => "ERROR",
            MessageKind::Connected => "CONNECTED",
        }
    }

    /// Whether clients are allowed to send this kind.
    #[must_use]
    pub fn is_client_kind(&self) -> bool {
        matches!(
            self,
            MessageKind::Subscribe | MessageKind::Unsubscribe | MessageKind::Ping
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// A typed protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A new score was recorded.
    ScoreUpdate(ScoreUpdatePayload),
    /// The leaderboard of a game changed.
    LeaderboardUpdate(LeaderboardUpdatePayload),
    /// Subscribe to a game.
    Subscribe(String),
    /// Unsubscribe from a game.
    Unsubscribe(String),
    /// Application-level ping.
    Ping,
    /// Application-level pong.
    Pong,
    /// Error response.
    Error(ErrorPayload),
    /// Connection established.
    Connected(ConnectedPayload),
    /// A `type` this protocol does not know. Carries the raw type string.
    Unrecognized(String),
}

impl Message {
    /// The kind of this message, or `None` if it was not recognized.
    #[must_use]
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Message::ScoreUpdate(_) => Some(MessageKind::ScoreUpdate),
            Message::LeaderboardUpdate(_) => Some(MessageKind::LeaderboardUpdate),
            Message::Subscribe(_) => Some(MessageKind::Subscribe),
            Message::Unsubscribe(_) => Some(MessageKind::Unsubscribe),
            Message::Ping => Some(MessageKind::Ping),
            Message::Pong => Some(MessageKind::Pong),
            Message::Error(_) => Some(MessageKind::Error),
            Message::Connected(_) => Some(MessageKind::Connected),
            Message::Unrecognized(_) => None,
        }
    }

    /// The value of the `type` field for this message.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Message::Unrecognized(raw) => raw,
            other => other.kind().map_or("", |k| k.as_str()),
        }
    }
}

/// A message plus its creation timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    message: Message,
    timestamp: DateTime<Utc>,
}

/// Current UTC time at the precision the wire format carries.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

impl Envelope {
    /// Wrap a message, stamping it with the current time.
    #[must_use]
    pub fn new(message: Message) -> Self {
        Self::at(message, now())
    }

    /// Wrap a message with an explicit timestamp.
    ///
    /// Sub-second precision is dropped so the envelope survives an
    /// encode/decode cycle unchanged.
    #[must_use]
    pub fn at(message: Message, timestamp: DateTime<Utc>) -> Self {
        Self {
            message,
            timestamp: timestamp.trunc_subsecs(0),
        }
    }

    /// The wrapped message.
    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Consume the envelope, returning the message.
    #[must_use]
    pub fn into_message(self) -> Message {
        self.message
    }

    /// Creation timestamp.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The message kind, `None` for unrecognized messages.
    #[must_use]
    pub fn kind(&self) -> Option<MessageKind> {
        self.message.kind()
    }

    /// Create a `SCORE_UPDATE` envelope.
    #[must_use]
    pub fn score_update(payload: ScoreUpdatePayload) -> Self {
        Self::new(Message::ScoreUpdate(payload))
    }

    /// Create a `LEADERBOARD_UPDATE` envelope.
    #[must_use]
    pub fn leaderboard_update(game_name: impl Into<String>, top_scores: Vec<ScoreEntry>) -> Self {
        Self::new(Message::LeaderboardUpdate(LeaderboardUpdatePayload {
            game_name: game_name.into(),
            top_scores,
        }))
    }

    /// Create a `SUBSCRIBE` envelope.
    #[must_use]
    pub fn subscribe(game_name: impl Into<String>) -> Self {
        Self::new(Message::Subscribe(game_name.into()))
    }

    /// Create an `UNSUBSCRIBE` envelope.
    #[must_use]
    pub fn unsubscribe(game_name: impl Into<String>) -> Self {
        Self::new(Message::Unsubscribe(game_name.into()))
    }

    /// Create a `PING` envelope.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(Message::Ping)
    }

    /// Create a `PONG` envelope.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(Message::Pong)
    }

    /// Create an `ERROR` envelope.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(Message::Error(ErrorPayload {
            code,
            message: message.into(),
        }))
    }

    /// Create a `CONNECTED` envelope.
    #[must_use]
    pub fn connected(client_id: impl Into<String>, games: Vec<String>) -> Self {
        Self::new(Message::Connected(ConnectedPayload {
            client_id: client_id.into(),
            games,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_message_kind() {
        assert_eq!(Envelope::subscribe("x").kind(), Some(MessageKind::Subscribe));
        assert_eq!(Envelope::pong().kind(), Some(MessageKind::Pong));
        assert_eq!(Message::Unrecognized("HELLO".into()).kind(), None);
    }

    #[test]
    fn test_kind_from_str() {
        for kind in MessageKind::ALL {
            assert_eq!(kind.as_str().parse::<MessageKind>(), Ok(kind));
        }
        assert!("subscribe".parse::<MessageKind>().is_err());
    }

    #[test]
    fn test_client_kinds() {
        let client: Vec<_> = MessageKind::ALL
            .into_iter()
            .filter(MessageKind::is_client_kind)
            .collect();
        assert_eq!(
            client,
            vec![MessageKind::Subscribe, MessageKind::Unsubscribe, MessageKind::Ping]
        );
    }

    #[test]
    fn test_timestamp_truncated() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
            + chrono::Duration::milliseconds(750);
        let envelope = Envelope::at(Message::Ping, ts);
        assert_eq!(envelope.timestamp().timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn test_type_name() {
        assert_eq!(Message::Ping.type_name(), "PING");
        assert_eq!(Message::Unrecognized("WAT".into()).type_name(), "WAT");
    }
}
