//! Shared fixtures for zerobase benchmarks.

use bytes::Bytes;
use crossbeam::channel::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use zerobase_core::{Node, NodeSettings, PublisherConfig, SubscriberConfig};

/// A started node that publishes to and subscribes from `endpoint`, with
/// every received payload forwarded on the returned channel.
///
/// # Panics
///
/// Panics if the node cannot be started.
#[must_use]
pub fn loopback_node(endpoint: &str, topic: &str) -> (Node, Receiver<Bytes>) {
    let (tx, rx) = channel::unbounded();
    let node = Node::builder()
        .name("bench")
        .with_publisher(PublisherConfig::new(endpoint))
        .with_subscriber(SubscriberConfig::new(endpoint, [topic]))
        .settings(NodeSettings {
            poll_timeout: Duration::from_millis(10),
            high_water_mark: 100_000,
            ..NodeSettings::default()
        })
        .on_message(move |_, payload| {
            let _ = tx.send(payload.clone());
            Ok(())
        })
        .build();
    node.start().expect("failed to start bench node");
    (node, rx)
}

/// Spin until `condition` holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}
