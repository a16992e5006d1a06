//! # zerobase-core
//!
//! Lifecycle and concurrency wrapper around pub/sub sockets.
//!
//! A [`Node`] gives a host process:
//!
//! - **Publishers** - zero or more bound outbound sockets behind one
//!   thread-safe [`Publisher`]
//! - **Subscribers** - topic-filtered inbound sockets drained by a
//!   background receive loop that calls the message handler
//! - **Lifecycle** - `start` / `stop` / `run`, with an optional main routine
//!   executed on the caller's thread while messages are dispatched
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!   start/stop/run ─▶│     Node     │◀── StopHandle
//!                    └──────┬───────┘
//!             ┌─────────────┼──────────────┐
//!             ▼             ▼              ▼
//!     ┌──────────────┐ ┌──────────┐ ┌─────────────┐
//!     │SocketManager │ │ Receive  │ │ MainRunner  │
//!     │ (open/close) │ │  Loop    │ │(caller thd) │
//!     └──────┬───────┘ └────┬─────┘ └─────────────┘
//!            ▼              ▼
//!      PubSocket(s)    SubSocket(s) ──▶ handler(topic, payload)
//!            ▲
//!       Publisher::send
//! ```

mod hooks;
mod node;
mod publisher;
mod receiver;
mod runner;
mod sockets;
mod state;

pub mod config;
pub mod error;
pub mod metrics;

pub use config::{NodeSettings, PublisherConfig, SubscriberConfig};
pub use error::{BoxError, NodeError, OpenError, SendError};
pub use hooks::{HandlerResult, MainRoutine, MessageHandler, TerminatedHook};
pub use node::{Node, NodeBuilder, DEFAULT_NODE_NAME};
pub use publisher::{decode_payload, Publisher};
pub use runner::StopHandle;
pub use state::NodeState;

pub use zerobase_transport::{Endpoint, Transport};
