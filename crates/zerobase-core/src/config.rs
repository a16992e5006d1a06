//! Node configuration objects.
//!
//! [`PublisherConfig`] and [`SubscriberConfig`] are plain data holders;
//! [`NodeSettings`] carries the runtime tuning knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use zerobase_transport::SocketOptions;

/// Default receive poll timeout.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Default bound on joining the receive loop during `stop()`.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Default number of transport I/O threads.
pub const DEFAULT_IO_THREADS: usize = 1;

/// Where to bind an outbound socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Endpoint to bind, e.g. `tcp://*:5555` or `inproc://events`.
    pub endpoint: String,
}

impl PublisherConfig {
    /// Create a publisher config.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

/// Where to connect an inbound socket and which topics it accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// Endpoint to connect to.
    pub endpoint: String,
    /// Topic prefix filters. Duplicates are removed, first occurrence wins.
    #[serde(default)]
    pub topics: Vec<String>,
}

impl SubscriberConfig {
    /// Create a subscriber config.
    #[must_use]
    pub fn new<I, T>(endpoint: impl Into<String>, topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for topic in topics {
            let topic = topic.into();
            if !unique.contains(&topic) {
                unique.push(topic);
            }
        }

        Self {
            endpoint: endpoint.into(),
            topics: unique,
        }
    }

    /// Topic filters with duplicates removed.
    ///
    /// Configs built through serde may still carry duplicates.
    #[must_use]
    pub fn unique_topics(&self) -> Vec<String> {
        let mut unique: Vec<String> = Vec::with_capacity(self.topics.len());
        for topic in &self.topics {
            if !unique.contains(topic) {
                unique.push(topic.clone());
            }
        }
        unique
    }
}

/// Runtime settings of a node.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// How long one poll of the inbound sockets may block.
    pub poll_timeout: Duration,
    /// How long `stop()` waits for the receive loop to exit.
    pub join_timeout: Duration,
    /// Number of transport I/O threads.
    pub io_threads: usize,
    /// Per-subscriber queue depth before units are dropped.
    pub high_water_mark: usize,
    /// Delay between subscriber reconnect attempts.
    pub reconnect_interval: Duration,
}

impl Default for NodeSettings {
    fn default() -> Self {
        let socket = SocketOptions::default();
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            io_threads: DEFAULT_IO_THREADS,
            high_water_mark: socket.high_water_mark,
            reconnect_interval: socket.reconnect_interval,
        }
    }
}

impl NodeSettings {
    /// Clamp values the receive loop cannot work with.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.poll_timeout.is_zero() {
            self.poll_timeout = Duration::from_millis(1);
        }
        if self.io_threads == 0 {
            self.io_threads = 1;
        }
        if self.high_water_mark == 0 {
            self.high_water_mark = 1;
        }
        if self.join_timeout <= self.poll_timeout {
            warn!(
                poll_timeout = ?self.poll_timeout,
                join_timeout = ?self.join_timeout,
                "join_timeout does not exceed poll_timeout; stop() may time out on an idle loop"
            );
        }
        self
    }

    /// Socket options handed to the transport.
    #[must_use]
    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            high_water_mark: self.high_water_mark,
            reconnect_interval: self.reconnect_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_topics_dedup() {
        let config = SubscriberConfig::new("inproc://a", ["B", "A", "B", "C", "A"]);
        assert_eq!(config.topics, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_subscriber_config_deserialize_default_topics() {
        let config: SubscriberConfig =
            rmp_serde::from_slice(&rmp_serde::to_vec_named(&PublisherConfig::new("inproc://x")).unwrap())
                .unwrap();
        assert_eq!(config.endpoint, "inproc://x");
        assert!(config.topics.is_empty());
    }

    #[test]
    fn test_unique_topics() {
        let config = SubscriberConfig {
            endpoint: "inproc://a".into(),
            topics: vec!["x".into(), "x".into(), "y".into()],
        };
        assert_eq!(config.unique_topics(), vec!["x", "y"]);
    }

    #[test]
    fn test_default_settings() {
        let settings = NodeSettings::default();
        assert_eq!(settings.poll_timeout, Duration::from_millis(100));
        assert_eq!(settings.join_timeout, Duration::from_secs(2));
        assert_eq!(settings.io_threads, 1);
    }

    #[test]
    fn test_normalized_clamps_zero_values() {
        let settings = NodeSettings {
            poll_timeout: Duration::ZERO,
            io_threads: 0,
            high_water_mark: 0,
            ..NodeSettings::default()
        }
        .normalized();

        assert_eq!(settings.poll_timeout, Duration::from_millis(1));
        assert_eq!(settings.io_threads, 1);
        assert_eq!(settings.high_water_mark, 1);
    }
}
