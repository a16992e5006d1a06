//! # zerobase-transport
//!
//! Socket abstraction layer for zerobase nodes.
//!
//! This crate provides a unified interface over the endpoint schemes a node
//! can bind or connect to:
//!
//! - **tcp://host:port** - Length-prefixed frames over TCP
//! - **inproc://name** - In-process delivery through a shared registry
//!
//! ## Socket Abstraction
//!
//! Every transport implements [`Transport`], which hands out publisher
//! sockets ([`PubSocket`]) and topic-filtered subscriber sockets
//! ([`SubSocket`]). The sockets run their I/O on an [`IoContext`] owned by
//! the caller.
//!
//! ```rust,ignore
//! use zerobase_transport::{Endpoint, IoContext, MultiTransport, SocketOptions, Transport};
//!
//! let io = IoContext::new(1, SocketOptions::default())?;
//! let transport = MultiTransport::standard();
//! let mut publisher = transport.bind(&io, &"tcp://*:5555".parse()?)?;
//! publisher.send("A", &bytes::Bytes::from_static(b"hello"))?;
//! ```

pub mod context;
pub mod endpoint;
pub mod inproc;
pub mod multi;
pub mod traits;

#[cfg(feature = "tcp")]
pub mod tcp;

pub use context::{IoContext, SocketOptions};
pub use endpoint::{Endpoint, EndpointError};
pub use inproc::InprocTransport;
pub use multi::MultiTransport;
pub use traits::{Envelope, PubSocket, SubSocket, Transport, TransportError};

#[cfg(feature = "tcp")]
pub use tcp::TcpTransport;
