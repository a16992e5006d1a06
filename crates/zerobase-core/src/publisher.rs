//! Thread-safe publication handle.
//!
//! A [`Publisher`] is cheap to clone and can be moved into the message
//! handler, the main routine or any other thread. All clones share one lock
//! around the node's outbound sockets, so concurrent sends never interleave
//! on the wire.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};
use zerobase_protocol::validate_topic;
use zerobase_transport::{Endpoint, PubSocket};

use crate::error::SendError;
use crate::metrics;
use crate::state::{NodeState, StateCell};

struct Shared {
    state: Arc<StateCell>,
    /// `None` until the node starts and again after it stops.
    outbound: Mutex<Option<Vec<Box<dyn PubSocket>>>>,
}

/// Publication handle of a node.
#[derive(Clone)]
pub struct Publisher {
    shared: Arc<Shared>,
}

impl Publisher {
    pub(crate) fn new(state: Arc<StateCell>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state,
                outbound: Mutex::new(None),
            }),
        }
    }

    /// Publish `message` on `topic` to every outbound socket.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotRunning`] outside `Running` without touching
    /// the transport, [`SendError::NoPublisher`] if the node has no
    /// publisher, and [`SendError::Transport`] if a socket rejects the write.
    pub fn send(&self, message: impl Into<Bytes>, topic: &str) -> Result<(), SendError> {
        if self.shared.state.get() != NodeState::Running {
            return Err(SendError::NotRunning);
        }
        validate_topic(topic).map_err(SendError::InvalidTopic)?;

        let payload = message.into();
        let mut guard = self.shared.outbound.lock();
        // stop() may have detached the sockets after the state check.
        let Some(sockets) = guard.as_mut() else {
            return Err(SendError::NotRunning);
        };
        if sockets.is_empty() {
            metrics::record_send_failure("no_publisher");
            return Err(SendError::NoPublisher);
        }

        for socket in sockets.iter_mut() {
            if let Err(source) = socket.send(topic, &payload) {
                metrics::record_send_failure("transport");
                return Err(SendError::Transport {
                    endpoint: socket.endpoint().to_string(),
                    source,
                });
            }
        }

        trace!(topic, len = payload.len(), "Published");
        metrics::record_sent(payload.len());
        Ok(())
    }

    /// Publish a MessagePack-encoded value on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Encode`] if `value` cannot be serialized, and
    /// otherwise the same errors as [`Publisher::send`].
    pub fn send_msgpack<T: Serialize + ?Sized>(
        &self,
        value: &T,
        topic: &str,
    ) -> Result<(), SendError> {
        if self.shared.state.get() != NodeState::Running {
            return Err(SendError::NotRunning);
        }
        let payload = rmp_serde::to_vec_named(value).map_err(|e| {
            metrics::record_send_failure("encode");
            SendError::Encode(e)
        })?;
        self.send(payload, topic)
    }

    /// Number of connected subscribers, across all outbound sockets, whose
    /// filters match `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared
            .outbound
            .lock()
            .as_ref()
            .map_or(0, |sockets| {
                sockets.iter().map(|s| s.subscriber_count(topic)).sum()
            })
    }

    /// Endpoints of the attached outbound sockets.
    pub(crate) fn endpoints(&self) -> Vec<Endpoint> {
        self.shared
            .outbound
            .lock()
            .as_ref()
            .map_or_else(Vec::new, |sockets| {
                sockets.iter().map(|s| s.endpoint().clone()).collect()
            })
    }

    pub(crate) fn attach(&self, sockets: Vec<Box<dyn PubSocket>>) {
        debug!(count = sockets.len(), "Outbound sockets attached");
        *self.shared.outbound.lock() = Some(sockets);
    }

    /// Take the outbound sockets back. Waits for any in-flight send.
    pub(crate) fn detach(&self) -> Vec<Box<dyn PubSocket>> {
        self.shared.outbound.lock().take().unwrap_or_default()
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("state", &self.shared.state.get())
            .field("endpoints", &self.endpoints())
            .finish()
    }
}

/// Decode a payload published with [`Publisher::send_msgpack`].
///
/// # Errors
///
/// Returns an error if the payload is not valid MessagePack for `T`.
pub fn decode_payload<T: DeserializeOwned>(payload: &Bytes) -> Result<T, rmp_serde::decode::Error> {
    rmp_serde::from_slice(payload)
}
