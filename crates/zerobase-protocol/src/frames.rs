//! Frames exchanged on a stream connection.
//!
//! A subscriber connection starts with `Hello` followed by one `Subscribe`
//! per topic filter. Filters are fixed for the life of the connection. The
//! publisher only ever writes `Publish` frames downstream.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::version::Version;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Hello { version: Version },

    /// Add a topic prefix filter. The empty prefix matches every topic.
    Subscribe { topic: String },

    /// One (topic, payload) message. The payload is never inspected.
    Publish { topic: String, payload: Bytes },
}

impl Frame {
    /// Short frame name, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::Subscribe { .. } => "subscribe",
            Frame::Publish { .. } => "publish",
        }
    }

    #[must_use]
    pub fn hello(version: Version) -> Self {
        Frame::Hello { version }
    }

    #[must_use]
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Frame::Subscribe { topic: topic.into() }
    }

    #[must_use]
    pub fn publish(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Frame::Publish {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
