//! Payload bodies carried inside envelopes.
//!
//! Field names follow the camelCase JSON used by browser clients.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single recorded score, broadcast to subscribers of its game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdatePayload {
    /// Identifier assigned by the score store.
    pub id: u64,
    /// Player who achieved the score.
    pub player_name: String,
    /// Game (topic) the score belongs to.
    pub game_name: String,
    /// The score value.
    pub score: i64,
    /// When the score was achieved, RFC3339.
    pub achieved_at: String,
}

/// A leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    pub id: u64,
    pub player_name: String,
    pub game_name: String,
    pub score: i64,
    pub achieved_at: String,
    pub created_at: String,
}

/// Top scores for one game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardUpdatePayload {
    pub game_name: String,
    #[serde(default)]
    pub top_scores: Vec<ScoreEntry>,
}

/// Body of `SUBSCRIBE` and `UNSUBSCRIBE`.
///
/// A missing `gameName` decodes as the empty string so that the caller can
/// reject it with a proper error instead of a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    #[serde(default)]
    pub game_name: String,
}

/// Error codes reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The inbound frame was not a valid envelope.
    ParseError,
    /// Subscribe request without a usable game name.
    InvalidGame,
    /// The client already holds the maximum number of subscriptions.
    TooManySubscriptions,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::InvalidGame => "INVALID_GAME",
            ErrorCode::TooManySubscriptions => "TOO_MANY_SUBSCRIPTIONS",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `ERROR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

/// Body of `CONNECTED`, sent once right after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    /// Identifier assigned to the connection.
    pub client_id: String,
    /// Games the client may subscribe to.
    #[serde(default)]
    pub games: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_update_field_names() {
        let payload = ScoreUpdatePayload {
            id: 7,
            player_name: "ada".into(),
            game_name: "Tetris".into(),
            score: 1200,
            achieved_at: "2024-05-01T12:00:00Z".into(),
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["playerName"], "ada");
        assert_eq!(json["gameName"], "Tetris");
        assert_eq!(json["achievedAt"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_error_code_wire_names() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::ParseError).unwrap(),
            "\"PARSE_ERROR\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::InvalidGame).unwrap(),
            "\"INVALID_GAME\""
        );
        assert_eq!(ErrorCode::TooManySubscriptions.to_string(), "TOO_MANY_SUBSCRIPTIONS");
    }

    #[test]
    fn test_subscribe_payload_missing_game_name() {
        let payload: SubscribePayload = serde_json::from_str("{}").unwrap();
        assert!(payload.game_name.is_empty());
    }
}
