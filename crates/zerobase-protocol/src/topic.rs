//! Topic validation and filter matching.
//!
//! Topics are opaque strings. Hierarchical-looking names such as
//! `"topic/porkchop"` are not parsed; filters match on a plain byte prefix.

/// Maximum topic length in bytes.
pub const MAX_TOPIC_LENGTH: usize = 1024;

/// Validate a topic used for publishing.
///
/// # Errors
///
/// Returns an error message if the topic is empty or too long.
pub fn validate_topic(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("Topic cannot be empty");
    }
    if topic.len() > MAX_TOPIC_LENGTH {
        return Err("Topic too long");
    }
    Ok(())
}

/// Check whether `topic` is accepted by the subscription `filter`.
///
/// The empty filter accepts every topic.
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    topic.as_bytes().starts_with(filter.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_validation() {
        assert!(validate_topic("A").is_ok());
        assert!(validate_topic("topic/porkchop").is_ok());
        assert!(validate_topic("").is_err());

        let long_topic = "a".repeat(MAX_TOPIC_LENGTH + 1);
        assert!(validate_topic(&long_topic).is_err());
    }

    #[test]
    fn test_topic_prefix_matching() {
        assert!(topic_matches("A", "A"));
        assert!(topic_matches("topic/", "topic/porkchop"));
        assert!(topic_matches("", "anything"));
        assert!(!topic_matches("B", "A"));
        assert!(!topic_matches("topic/porkchop", "topic/"));
    }
}
