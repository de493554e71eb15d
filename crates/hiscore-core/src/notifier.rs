//! Domain event publishing.
//!
//! The [`Notifier`] is the entry point for the rest of the system: when a
//! score is recorded or a leaderboard changes, it builds the matching
//! envelope and hands it to the hub for the game's subscribers.

use hiscore_protocol::codec;
use hiscore_protocol::{Envelope, ScoreEntry, ScoreUpdatePayload};
use tracing::{debug, error};

use crate::hub::{Hub, HubError};

/// Publishes score and leaderboard events to subscribed clients.
#[derive(Clone)]
pub struct Notifier {
    hub: Hub,
}

impl Notifier {
    /// Create a notifier publishing through `hub`.
    #[must_use]
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }

    /// Announce a newly recorded score to the game's subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn score_recorded(&self, score: ScoreUpdatePayload) -> Result<(), HubError> {
        let game = score.game_name.clone();
        debug!(game = %game, player = %score.player_name, score = score.score, "Publishing score update");
        self.publish(&game, &Envelope::score_update(score)).await
    }

    /// Announce a game's new top scores to its subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn leaderboard_changed(
        &self,
        game: &str,
        top_scores: Vec<ScoreEntry>,
    ) -> Result<(), HubError> {
        debug!(game = %game, entries = top_scores.len(), "Publishing leaderboard update");
        self.publish(game, &Envelope::leaderboard_update(game, top_scores))
            .await
    }

    /// Send an envelope to every connected client regardless of topic.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn announce(&self, envelope: &Envelope) -> Result<(), HubError> {
        match codec::encode(envelope) {
            Ok(frame) => self.hub.broadcast_all(frame).await,
            Err(e) => {
                error!(error = %e, "Failed to encode announcement");
                Ok(())
            }
        }
    }

    async fn publish(&self, game: &str, envelope: &Envelope) -> Result<(), HubError> {
        match codec::encode(envelope) {
            Ok(frame) => self.hub.broadcast_to_topic(game, frame).await,
            Err(e) => {
                error!(game = %game, error = %e, "Failed to encode event");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{outbound_queue, ClientHandle};
    use crate::hub::HubConfig;
    use hiscore_protocol::{Message, MessageKind};

    fn score(game: &str) -> ScoreUpdatePayload {
        ScoreUpdatePayload {
            id: 7,
            player_name: "ada".into(),
            game_name: game.into(),
            score: 9001,
            achieved_at: "2024-05-01T12:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn test_score_reaches_game_subscribers_only() {
        let hub = Hub::spawn(HubConfig::default());
        let notifier = Notifier::new(hub.clone());

        let (tetris_tx, mut tetris_rx) = outbound_queue(8);
        let (snake_tx, mut snake_rx) = outbound_queue(8);
        hub.register(ClientHandle::new("t".into(), tetris_tx)).await.unwrap();
        hub.register(ClientHandle::new("s".into(), snake_tx)).await.unwrap();
        hub.subscribe(&"t".into(), "Tetris").await.unwrap();
        hub.subscribe(&"s".into(), "Snake").await.unwrap();

        notifier.score_recorded(score("Tetris")).await.unwrap();
        hub.flush().await.unwrap();

        let frame = tetris_rx.try_recv().unwrap();
        let envelope = codec::decode(&frame).unwrap();
        assert_eq!(envelope.message(), &Message::ScoreUpdate(score("Tetris")));
        assert!(snake_rx.try_recv().is_err());

        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value["type"], "SCORE_UPDATE");
        assert_eq!(value["payload"]["gameName"], "Tetris");
    }

    #[tokio::test]
    async fn test_leaderboard_update() {
        let hub = Hub::spawn(HubConfig::default());
        let notifier = Notifier::new(hub.clone());

        let (tx, mut rx) = outbound_queue(8);
        hub.register(ClientHandle::new("c".into(), tx)).await.unwrap();
        hub.subscribe(&"c".into(), "Snake").await.unwrap();

        let top = vec![ScoreEntry {
            id: 1,
            player_name: "bob".into(),
            game_name: "Snake".into(),
            score: 50,
            achieved_at: "2024-05-01T11:59:00Z".into(),
            created_at: "2024-05-01T12:00:00Z".into(),
        }];
        notifier.leaderboard_changed("Snake", top.clone()).await.unwrap();
        notifier.leaderboard_changed("Tetris", Vec::new()).await.unwrap();
        hub.flush().await.unwrap();

        let envelope = codec::decode(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(envelope.kind(), Some(MessageKind::LeaderboardUpdate));
        match envelope.into_message() {
            Message::LeaderboardUpdate(payload) => {
                assert_eq!(payload.game_name, "Snake");
                assert_eq!(payload.top_scores, top);
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_large_leaderboard_delivered() {
        let hub = Hub::spawn(HubConfig::default());
        let notifier = Notifier::new(hub.clone());

        let (tx, mut rx) = outbound_queue(8);
        hub.register(ClientHandle::new("c".into(), tx)).await.unwrap();
        hub.subscribe(&"c".into(), "Tetris").await.unwrap();

        let entry = ScoreEntry {
            id: 1,
            player_name: "x".repeat(4096),
            game_name: "Tetris".into(),
            score: 1,
            achieved_at: "2024-05-01T11:59:00Z".into(),
            created_at: "2024-05-01T12:00:00Z".into(),
        };
        notifier
            .leaderboard_changed("Tetris", vec![entry; 200])
            .await
            .unwrap();
        hub.flush().await.unwrap();

        let frame = rx.try_recv().unwrap();
        assert!(frame.len() > codec::MAX_MESSAGE_SIZE);
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value["payload"]["topScores"].as_array().unwrap().len(), 200);
    }

    #[tokio::test]
    async fn test_announce_reaches_everyone() {
        let hub = Hub::spawn(HubConfig::default());
        let notifier = Notifier::new(hub.clone());

        let (a_tx, mut a_rx) = outbound_queue(8);
        let (b_tx, mut b_rx) = outbound_queue(8);
        hub.register(ClientHandle::new("a".into(), a_tx)).await.unwrap();
        hub.register(ClientHandle::new("b".into(), b_tx)).await.unwrap();

        notifier.announce(&Envelope::ping()).await.unwrap();
        hub.flush().await.unwrap();

        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
    }
}
