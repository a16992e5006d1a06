//! Node assembly for the runner.

use bytes::Bytes;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use zerobase_core::{BoxError, Node, Publisher, SendError};

use crate::config::Config;
use crate::metrics;

/// Longest single sleep of the main routine, so stop requests are seen
/// promptly.
const MAIN_TICK: Duration = Duration::from_millis(50);

/// Build a node from the runner configuration.
pub fn build_node(config: &Config) -> Node {
    let mut builder = Node::builder()
        .name(config.name.clone())
        .settings(config.runtime.settings())
        .on_message(log_message)
        .on_terminated(|| info!("Node terminated"));

    for publisher in &config.publishers {
        builder = builder.with_publisher(publisher.clone());
    }
    for subscriber in &config.subscribers {
        builder = builder.with_subscriber(subscriber.clone());
    }

    let mut heartbeat = Heartbeat::new(builder.publisher(), config);
    builder.main(move || heartbeat.tick()).build()
}

fn log_message(topic: &str, payload: &Bytes) -> Result<(), BoxError> {
    match std::str::from_utf8(payload) {
        Ok(text) => info!(topic, payload = text, "Received"),
        Err(_) => info!(topic, len = payload.len(), "Received binary payload"),
    }
    Ok(())
}

/// Main routine: publishes heartbeats when enabled, otherwise idles until
/// a stop is requested.
struct Heartbeat {
    publisher: Publisher,
    topic: Option<String>,
    interval: Duration,
    next: Instant,
    sequence: u64,
}

impl Heartbeat {
    fn new(publisher: Publisher, config: &Config) -> Self {
        Self {
            publisher,
            topic: config.heartbeat.enabled.then(|| config.heartbeat.topic.clone()),
            interval: config.heartbeat_interval(),
            next: Instant::now(),
            sequence: 0,
        }
    }

    fn tick(&mut self) -> Result<ControlFlow<()>, BoxError> {
        let now = Instant::now();
        if let Some(topic) = &self.topic {
            if now >= self.next {
                self.sequence += 1;
                match self.publisher.send(self.sequence.to_string(), topic) {
                    Ok(()) => metrics::record_heartbeat(),
                    Err(SendError::NoPublisher) => {
                        warn!("Heartbeat enabled without a publisher; disabling");
                        self.topic = None;
                    }
                    Err(err) => return Err(err.into()),
                }
                self.next = now + self.interval;
            }
        }

        let wait = self.next.saturating_duration_since(Instant::now());
        std::thread::sleep(wait.clamp(Duration::from_millis(1), MAIN_TICK));
        Ok(ControlFlow::Continue(()))
    }
}
