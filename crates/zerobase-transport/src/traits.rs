//! Socket abstraction traits for zerobase.
//!
//! These traits define the interface that every transport implementation
//! must provide, so the node lifecycle never depends on a concrete scheme.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::context::IoContext;
use crate::endpoint::{Endpoint, EndpointError};

/// A received (topic, payload) unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Topic the unit was published on.
    pub topic: String,
    /// Opaque payload.
    pub payload: Bytes,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Endpoint could not be parsed.
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// Endpoint is already bound by another socket.
    #[error("Address already in use: {0}")]
    AddressInUse(Endpoint),

    /// Endpoint cannot be used for this operation.
    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint {
        endpoint: Endpoint,
        reason: &'static str,
    },

    /// No transport handles the endpoint's scheme.
    #[error("No transport for scheme '{0}'")]
    UnsupportedScheme(&'static str),

    /// Socket was already closed.
    #[error("Socket closed")]
    Closed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] zerobase_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A transport that can create sockets for the endpoints it supports.
pub trait Transport: Send + Sync {
    /// Get the transport name (e.g., "tcp", "inproc").
    fn name(&self) -> &'static str;

    /// Check whether this transport handles the endpoint.
    fn supports(&self, endpoint: &Endpoint) -> bool;

    /// Bind a publisher socket.
    ///
    /// Binding is synchronous: an address that is malformed or already in
    /// use is reported here rather than later.
    fn bind(
        &self,
        io: &IoContext,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn PubSocket>, TransportError>;

    /// Connect a subscriber socket and register its topic filters.
    ///
    /// Connecting does not wait for the remote side to exist; delivery
    /// starts once the peer is reachable.
    fn connect(
        &self,
        io: &IoContext,
        endpoint: &Endpoint,
        topics: &[String],
    ) -> Result<Box<dyn SubSocket>, TransportError>;
}

/// The outbound side of a pub/sub pair.
///
/// Sockets are not synchronized internally; callers sharing one across
/// threads must serialize access.
pub trait PubSocket: Send {
    /// The endpoint the socket is bound to, with ephemeral ports resolved.
    fn endpoint(&self) -> &Endpoint;

    /// Publish a two-part unit to every matching subscriber.
    ///
    /// Never blocks: subscribers whose queue is full miss the unit.
    fn send(&mut self, topic: &str, payload: &Bytes) -> Result<(), TransportError>;

    /// Number of connected subscribers whose filters match `topic`.
    fn subscriber_count(&self, topic: &str) -> usize;

    /// Close the socket. Calling this more than once is a no-op.
    fn close(&mut self);
}

/// The inbound, topic-filtered side of a pub/sub pair.
#[async_trait]
pub trait SubSocket: Send {
    /// The endpoint the socket connects to.
    fn endpoint(&self) -> &Endpoint;

    /// Topic filters registered for this socket.
    fn topics(&self) -> &[String];

    /// Receive the next unit.
    ///
    /// Returns `None` once the socket has been closed. Cancel safe: dropping
    /// the future never loses a unit.
    async fn recv(&mut self) -> Result<Option<Envelope>, TransportError>;

    /// Close the socket. Calling this more than once is a no-op.
    fn close(&mut self);
}
