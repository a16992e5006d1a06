//! I/O context shared by the sockets of one node.
//!
//! The context owns a small multi-threaded tokio runtime that drives socket
//! I/O. User code never runs on these threads.

use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

use crate::traits::TransportError;

/// Default per-subscriber queue depth.
pub const DEFAULT_HIGH_WATER_MARK: usize = 1000;

/// Default delay between TCP reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(100);

/// Socket tuning options.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Maximum number of queued units per subscriber before new units are
    /// dropped.
    pub high_water_mark: usize,
    /// Delay between reconnect attempts of a subscriber.
    pub reconnect_interval: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// I/O runtime for a set of sockets.
pub struct IoContext {
    runtime: Option<Runtime>,
    handle: Handle,
    options: SocketOptions,
}

impl IoContext {
    /// Create a new context with `io_threads` worker threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be started.
    pub fn new(io_threads: usize, options: SocketOptions) -> Result<Self, TransportError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(io_threads.max(1))
            .thread_name("zerobase-io")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        debug!(io_threads = io_threads.max(1), "I/O context started");

        Ok(Self {
            runtime: Some(runtime),
            handle,
            options,
        })
    }

    /// Get the runtime handle.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Get the socket options.
    #[must_use]
    pub fn options(&self) -> &SocketOptions {
        &self.options
    }

    /// Stop all socket I/O without waiting for in-flight writes.
    pub fn shutdown(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            debug!("I/O context shut down");
        }
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for IoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext")
            .field("running", &self.runtime.is_some())
            .field("options", &self.options)
            .finish()
    }
}
