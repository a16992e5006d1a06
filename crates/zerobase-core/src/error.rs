//! Error types for node lifecycle and publication.

use std::time::Duration;
use thiserror::Error;
use zerobase_transport::{EndpointError, TransportError};

use crate::state::NodeState;

/// Boxed error returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure to open the node's sockets. Fatal to `start()`.
#[derive(Debug, Error)]
pub enum OpenError {
    /// An endpoint string could not be parsed.
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// A publisher socket could not be bound.
    #[error("Failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// A subscriber socket could not be connected.
    #[error("Failed to connect {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// The transport I/O context could not be started.
    #[error("Failed to start transport: {0}")]
    Context(#[source] TransportError),
}

impl OpenError {
    /// Whether the failure was caused by an endpoint already in use.
    #[must_use]
    pub fn is_address_in_use(&self) -> bool {
        matches!(
            self,
            Self::Bind {
                source: TransportError::AddressInUse(_),
                ..
            }
        )
    }
}

/// Failure to publish a message. Never fatal to the node.
#[derive(Debug, Error)]
pub enum SendError {
    /// The node is not running.
    #[error("Node is not running")]
    NotRunning,

    /// The node has no publisher configured.
    #[error("No publisher configured")]
    NoPublisher,

    /// The topic is not publishable.
    #[error("Invalid topic: {0}")]
    InvalidTopic(&'static str),

    /// A structured payload could not be encoded.
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// The transport rejected the write.
    #[error("Failed to send on {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: TransportError,
    },
}

/// Node lifecycle errors.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The operation is not valid in the node's current state.
    #[error("Cannot {operation} a node in state {state}")]
    InvalidState {
        operation: &'static str,
        state: NodeState,
    },

    /// Sockets could not be opened.
    #[error(transparent)]
    Open(#[from] OpenError),

    /// The receive loop did not exit within the join timeout.
    #[error("Receive loop did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    /// `stop()` was called from the receive loop thread.
    #[error("stop() cannot be called from the receive loop; use StopHandle::request_stop")]
    StopFromReceiveLoop,

    /// The receive loop thread could not be spawned.
    #[error("Failed to spawn receive loop: {0}")]
    Spawn(#[source] std::io::Error),

    /// The main routine failed or panicked.
    #[error("Main routine failed: {0}")]
    MainRoutine(#[source] BoxError),

    /// The receive loop thread panicked outside a handler.
    #[error("Receive loop panicked")]
    WorkerPanicked,
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerobase_transport::Endpoint;

    #[test]
    fn test_address_in_use_detection() {
        let err = OpenError::Bind {
            endpoint: "tcp://127.0.0.1:5555".into(),
            source: TransportError::AddressInUse(Endpoint::tcp("127.0.0.1", 5555)),
        };
        assert!(err.is_address_in_use());

        let err = OpenError::Context(TransportError::Closed);
        assert!(!err.is_address_in_use());
    }

    #[test]
    fn test_error_display() {
        let err = NodeError::InvalidState {
            operation: "start",
            state: NodeState::Stopped,
        };
        assert_eq!(err.to_string(), "Cannot start a node in state stopped");
        assert_eq!(SendError::NotRunning.to_string(), "Node is not running");
    }
}
