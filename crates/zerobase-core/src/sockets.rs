//! Socket manager: opens and closes the sockets of one node.

use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use zerobase_transport::{Endpoint, IoContext, PubSocket, SubSocket, Transport};

use crate::config::{NodeSettings, PublisherConfig, SubscriberConfig};
use crate::error::OpenError;

/// Sockets of a started node.
pub(crate) struct Sockets {
    pub(crate) outbound: Vec<Box<dyn PubSocket>>,
    pub(crate) inbound: Vec<Box<dyn SubSocket>>,
    /// Runtime driving the sockets' I/O.
    pub(crate) runtime: Handle,
}

/// Owns the transport I/O context and the lifetime of every socket.
pub(crate) struct SocketManager {
    transport: Arc<dyn Transport>,
    io: Option<IoContext>,
}

impl SocketManager {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            io: None,
        }
    }

    /// Bind every publisher and connect every subscriber.
    ///
    /// On failure, everything opened so far is closed before returning.
    pub(crate) fn open(
        &mut self,
        settings: &NodeSettings,
        publishers: &[PublisherConfig],
        subscribers: &[SubscriberConfig],
    ) -> Result<Sockets, OpenError> {
        // Parse everything up front so malformed endpoints never start I/O.
        let pub_endpoints = publishers
            .iter()
            .map(|c| c.endpoint.parse::<Endpoint>())
            .collect::<Result<Vec<_>, _>>()?;
        let sub_endpoints = subscribers
            .iter()
            .map(|c| c.endpoint.parse::<Endpoint>())
            .collect::<Result<Vec<_>, _>>()?;

        let io = IoContext::new(settings.io_threads, settings.socket_options())
            .map_err(OpenError::Context)?;

        let mut sockets = Sockets {
            outbound: Vec::with_capacity(pub_endpoints.len()),
            inbound: Vec::with_capacity(sub_endpoints.len()),
            runtime: io.handle().clone(),
        };

        for (config, endpoint) in publishers.iter().zip(&pub_endpoints) {
            match self.transport.bind(&io, endpoint) {
                Ok(socket) => {
                    debug!(endpoint = %socket.endpoint(), "Publisher bound");
                    sockets.outbound.push(socket);
                }
                Err(source) => {
                    rollback(io, sockets);
                    return Err(OpenError::Bind {
                        endpoint: config.endpoint.clone(),
                        source,
                    });
                }
            }
        }

        for (config, endpoint) in subscribers.iter().zip(&sub_endpoints) {
            let topics = config.unique_topics();
            if topics.is_empty() {
                warn!(endpoint = %endpoint, "Subscriber has no topics and will receive nothing");
            }
            match self.transport.connect(&io, endpoint, &topics) {
                Ok(socket) => {
                    debug!(endpoint = %endpoint, topics = ?topics, "Subscriber connected");
                    sockets.inbound.push(socket);
                }
                Err(source) => {
                    rollback(io, sockets);
                    return Err(OpenError::Connect {
                        endpoint: config.endpoint.clone(),
                        source,
                    });
                }
            }
        }

        self.io = Some(io);
        Ok(sockets)
    }

    /// Whether an I/O context is currently open.
    pub(crate) fn is_open(&self) -> bool {
        self.io.is_some()
    }

    /// Close the given sockets and shut down I/O.
    ///
    /// Safe to call repeatedly and with sockets that are already closed.
    pub(crate) fn close(
        &mut self,
        outbound: Vec<Box<dyn PubSocket>>,
        inbound: Vec<Box<dyn SubSocket>>,
    ) {
        close_all(outbound, inbound);
        if let Some(mut io) = self.io.take() {
            io.shutdown();
            debug!("Sockets closed");
        }
    }
}

impl fmt::Debug for SocketManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketManager")
            .field("transport", &self.transport.name())
            .field("io", &self.io)
            .finish()
    }
}

fn close_all(outbound: Vec<Box<dyn PubSocket>>, inbound: Vec<Box<dyn SubSocket>>) {
    for mut socket in outbound {
        socket.close();
    }
    for mut socket in inbound {
        socket.close();
    }
}

fn rollback(mut io: IoContext, sockets: Sockets) {
    debug!(
        outbound = sockets.outbound.len(),
        inbound = sockets.inbound.len(),
        "Rolling back partially opened sockets"
    );
    close_all(sockets.outbound, sockets.inbound);
    io.shutdown();
}
