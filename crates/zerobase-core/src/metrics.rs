//! Node instrumentation.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! host installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const MESSAGES_SENT_TOTAL: &str = "zerobase_messages_sent_total";
    pub const MESSAGES_RECEIVED_TOTAL: &str = "zerobase_messages_received_total";
    pub const BYTES_SENT_TOTAL: &str = "zerobase_bytes_sent_total";
    pub const BYTES_RECEIVED_TOTAL: &str = "zerobase_bytes_received_total";
    pub const CALLBACK_FAILURES_TOTAL: &str = "zerobase_callback_failures_total";
    pub const SEND_FAILURES_TOTAL: &str = "zerobase_send_failures_total";
    pub const NODES_RUNNING: &str = "zerobase_nodes_running";
}

/// Register descriptions for every node metric.
pub fn describe_metrics() {
    metrics::describe_counter!(names::MESSAGES_SENT_TOTAL, "Units published by nodes");
    metrics::describe_counter!(
        names::MESSAGES_RECEIVED_TOTAL,
        "Units dispatched to message handlers"
    );
    metrics::describe_counter!(
        names::CALLBACK_FAILURES_TOTAL,
        "Message handler errors and panics"
    );
    metrics::describe_counter!(names::BYTES_SENT_TOTAL, "Payload bytes published");
    metrics::describe_counter!(names::BYTES_RECEIVED_TOTAL, "Payload bytes dispatched");
    metrics::describe_counter!(names::SEND_FAILURES_TOTAL, "Failed publish attempts");
    metrics::describe_gauge!(names::NODES_RUNNING, "Nodes currently running");
}

pub(crate) fn record_sent(bytes: usize) {
    counter!(names::MESSAGES_SENT_TOTAL).increment(1);
    counter!(names::BYTES_SENT_TOTAL).increment(bytes as u64);
}

pub(crate) fn record_received(bytes: usize) {
    counter!(names::MESSAGES_RECEIVED_TOTAL).increment(1);
    counter!(names::BYTES_RECEIVED_TOTAL).increment(bytes as u64);
}

pub(crate) fn record_callback_failure(kind: &'static str) {
    counter!(names::CALLBACK_FAILURES_TOTAL, "kind" => kind).increment(1);
}

pub(crate) fn record_send_failure(reason: &'static str) {
    counter!(names::SEND_FAILURES_TOTAL, "reason" => reason).increment(1);
}

pub(crate) fn node_started() {
    gauge!(names::NODES_RUNNING).increment(1.0);
}

pub(crate) fn node_stopped() {
    gauge!(names::NODES_RUNNING).decrement(1.0);
}
