//! Topic naming rules.
//!
//! A topic is a game name. Clients subscribe to topics to receive the
//! broadcasts targeted at that game.

/// Maximum topic name length in bytes.
pub const MAX_TOPIC_NAME_LENGTH: usize = 256;

/// A topic identifier.
pub type TopicName = String;

/// Validate a topic name.
///
/// # Errors
///
/// Returns a human-readable reason if the name is unusable.
pub fn validate_topic_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Game name is required");
    }
    if name.len() > MAX_TOPIC_NAME_LENGTH {
        return Err("Game name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Game name contains invalid characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_name_validation() {
        assert!(validate_topic_name("Tetris").is_ok());
        assert!(validate_topic_name("Space Invaders: Deluxe").is_ok());
        assert!(validate_topic_name("ぷよぷよ").is_ok());
        assert_eq!(validate_topic_name(""), Err("Game name is required"));
        assert!(validate_topic_name("bad\nname").is_err());

        let long_name = "a".repeat(MAX_TOPIC_NAME_LENGTH + 1);
        assert!(validate_topic_name(&long_name).is_err());
    }
}
