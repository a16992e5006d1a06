//! Scheme-based transport selection.
//!
//! A [`MultiTransport`] holds several transports in order of preference and
//! hands each endpoint to the first one that supports it.

use std::sync::Arc;

use crate::context::IoContext;
use crate::endpoint::Endpoint;
use crate::inproc::InprocTransport;
use crate::traits::{PubSocket, SubSocket, Transport, TransportError};

/// A transport that delegates to the first member supporting an endpoint.
#[derive(Clone, Default)]
pub struct MultiTransport {
    transports: Vec<Arc<dyn Transport>>,
}

impl MultiTransport {
    /// Create a new multi transport with the given transports.
    ///
    /// Transports are tried in order (first = highest priority).
    #[must_use]
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        Self { transports }
    }

    /// Create the standard set: `inproc://` and, when enabled, `tcp://`.
    #[must_use]
    pub fn standard() -> Self {
        let mut transports: Vec<Arc<dyn Transport>> = vec![Arc::new(InprocTransport::new())];
        #[cfg(feature = "tcp")]
        transports.push(Arc::new(crate::tcp::TcpTransport::new()));
        Self::new(transports)
    }

    /// Add a transport to the end of the chain.
    pub fn add_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transports.push(transport);
    }

    /// Get the list of transport names in priority order.
    #[must_use]
    pub fn transport_names(&self) -> Vec<&'static str> {
        self.transports.iter().map(|t| t.name()).collect()
    }

    fn select(&self, endpoint: &Endpoint) -> Result<&Arc<dyn Transport>, TransportError> {
        self.transports
            .iter()
            .find(|t| t.supports(endpoint))
            .ok_or(TransportError::UnsupportedScheme(endpoint.scheme()))
    }
}

impl std::fmt::Debug for MultiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiTransport")
            .field("transports", &self.transport_names())
            .finish()
    }
}

impl Transport for MultiTransport {
    fn name(&self) -> &'static str {
        "multi"
    }

    fn supports(&self, endpoint: &Endpoint) -> bool {
        self.transports.iter().any(|t| t.supports(endpoint))
    }

    fn bind(
        &self,
        io: &IoContext,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn PubSocket>, TransportError> {
        self.select(endpoint)?.bind(io, endpoint)
    }

    fn connect(
        &self,
        io: &IoContext,
        endpoint: &Endpoint,
        topics: &[String],
    ) -> Result<Box<dyn SubSocket>, TransportError> {
        self.select(endpoint)?.connect(io, endpoint, topics)
    }
}
