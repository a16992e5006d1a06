//! # zerobase-protocol
//!
//! Wire protocol definitions for zerobase publish/subscribe nodes.
//!
//! Every message on the wire is a two-part unit: a topic string and an
//! opaque payload. Subscribers announce the topic prefixes they want and
//! publishers only forward matching units.
//!
//! ## Frame Types
//!
//! - `Hello` - Version greeting sent by a connecting subscriber
//! - `Subscribe` - Topic filter registration, sent once per filter on connect
//! - `Publish` - A (topic, payload) unit
//!
//! ## Example
//!
//! ```rust
//! use zerobase_protocol::{codec, Frame};
//!
//! let frame = Frame::publish("topic/porkchop", b"Hello, world!".to_vec());
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod topic;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::Frame;
pub use topic::{topic_matches, validate_topic, MAX_TOPIC_LENGTH};
pub use version::{Version, PROTOCOL_VERSION};
