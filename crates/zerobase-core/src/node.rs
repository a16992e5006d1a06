//! Node lifecycle controller.
//!
//! A [`Node`] owns the sockets, the receive loop thread and the callbacks of
//! one pub/sub participant. It moves through `Idle -> Running -> Stopped`
//! and never back.
//!
//! ```rust,ignore
//! use std::ops::ControlFlow;
//! use zerobase_core::{Node, PublisherConfig, SubscriberConfig};
//!
//! let node = Node::builder()
//!     .with_publisher(PublisherConfig::new("tcp://*:5555"))
//!     .with_subscriber(SubscriberConfig::new("tcp://localhost:5556", ["A", "B"]))
//!     .on_message(|topic, payload| {
//!         println!("{topic}: {payload:?}");
//!         Ok(())
//!     })
//!     .main(|| Ok(ControlFlow::Continue(())))
//!     .build();
//!
//! node.run()?;
//! ```

use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use zerobase_transport::{Endpoint, MultiTransport, Transport};

use crate::config::{NodeSettings, PublisherConfig, SubscriberConfig};
use crate::error::{BoxError, NodeError, SendError};
use crate::hooks::{
    panic_message, HandlerResult, Logger, MainRoutine, MessageHandler, TerminatedHook,
};
use crate::metrics;
use crate::publisher::Publisher;
use crate::receiver::{on_receive_thread, ReceiveLoop, ReceiveWorker, ShutdownSignal, SpawnFailure};
use crate::runner::{MainRunner, StopHandle};
use crate::sockets::SocketManager;
use crate::state::{NodeState, StateCell};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Default node name, used for logging and thread names.
pub const DEFAULT_NODE_NAME: &str = "zerobase";

/// Everything guarded by the lifecycle lock.
struct Lifecycle {
    manager: SocketManager,
    worker: Option<ReceiveWorker>,
    shutdown: ShutdownSignal,
    handler: Option<MessageHandler>,
    main: Option<MainRoutine>,
    on_terminated: Option<TerminatedHook>,
}

/// A pub/sub participant with a background receive loop.
///
/// `Node` is `Sync`: share it behind an `Arc` to call [`Node::stop`] from
/// another thread. Use [`StopHandle`] from signal handlers and from inside
/// the message handler.
pub struct Node {
    id: u64,
    name: String,
    settings: NodeSettings,
    publishers: Vec<PublisherConfig>,
    subscribers: Vec<SubscriberConfig>,
    state: Arc<StateCell>,
    publisher: Publisher,
    stop_handle: StopHandle,
    logger: Logger,
    lifecycle: Mutex<Lifecycle>,
}

impl Node {
    /// Start building a node.
    #[must_use]
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    /// Open the sockets and launch the receive loop.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidState`] unless the node is `Idle`, and
    /// [`NodeError::Open`] if a socket cannot be opened. After an open
    /// failure the node stays `Idle` and `start` may be retried.
    pub fn start(&self) -> Result<(), NodeError> {
        let state = self.state.get();
        if state != NodeState::Idle {
            return Err(NodeError::InvalidState {
                operation: "start",
                state,
            });
        }

        let mut lifecycle = self.lifecycle.lock();
        let state = self.state.get();
        if state != NodeState::Idle {
            return Err(NodeError::InvalidState {
                operation: "start",
                state,
            });
        }

        self.logger.info(&format!("Starting node '{}'", self.name));

        let sockets = match lifecycle
            .manager
            .open(&self.settings, &self.publishers, &self.subscribers)
        {
            Ok(sockets) => sockets,
            Err(err) => {
                self.logger
                    .error(&format!("Failed to start node '{}': {}", self.name, err));
                return Err(err.into());
            }
        };

        // Sends from the handler must succeed as soon as the loop runs.
        self.publisher.attach(sockets.outbound);
        self.state.set(NodeState::Running);

        let shutdown = ShutdownSignal::default();
        let receive_loop = ReceiveLoop::new(
            sockets.inbound,
            lifecycle.handler.take(),
            shutdown.clone(),
            self.settings.poll_timeout,
            self.logger.clone(),
            sockets.runtime,
        );

        match ReceiveWorker::spawn(&self.name, self.id, receive_loop) {
            Ok(worker) => {
                lifecycle.worker = Some(worker);
                lifecycle.shutdown = shutdown;
            }
            Err(SpawnFailure {
                error,
                receive_loop,
            }) => {
                let (inbound, handler) = receive_loop.into_parts();
                lifecycle.handler = handler;
                self.state.set(NodeState::Idle);
                let outbound = self.publisher.detach();
                lifecycle.manager.close(outbound, inbound);
                self.logger
                    .error(&format!("Failed to start node '{}': {}", self.name, error));
                return Err(error);
            }
        }

        metrics::node_started();
        self.logger.info(&format!("Node '{}' started", self.name));
        Ok(())
    }

    /// Stop the receive loop, close the sockets and move to `Stopped`.
    ///
    /// A no-op on a node that is not `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::StopFromReceiveLoop`] when called from the
    /// message handler, and [`NodeError::ShutdownTimeout`] if the receive
    /// loop does not exit within the join timeout. The node is `Stopped`
    /// and its sockets are closed in the timeout case too.
    pub fn stop(&self) -> Result<(), NodeError> {
        if on_receive_thread(self.id) {
            return Err(NodeError::StopFromReceiveLoop);
        }

        let mut lifecycle = self.lifecycle.lock();
        if self.state.get() != NodeState::Running {
            debug!(node = %self.name, state = %self.state.get(), "stop() on a node that is not running");
            return Ok(());
        }

        self.logger.info(&format!("Stopping node '{}'...", self.name));
        self.stop_handle.request_stop();
        lifecycle.shutdown.trigger();

        let joined = match lifecycle.worker.take() {
            Some(worker) => worker.join(self.settings.join_timeout),
            None => Ok(Vec::new()),
        };
        let (inbound, result) = match joined {
            Ok(inbound) => (inbound, Ok(())),
            // A detached worker closes its own sockets on exit.
            Err(err) => (Vec::new(), Err(err)),
        };

        self.state.set(NodeState::Stopped);
        let outbound = self.publisher.detach();
        lifecycle.manager.close(outbound, inbound);
        metrics::node_stopped();

        let hook = lifecycle.on_terminated.take();
        drop(lifecycle);

        match &result {
            Ok(()) => self.logger.info(&format!("Node '{}' stopped", self.name)),
            Err(err) => self
                .logger
                .warn(&format!("Node '{}' stopped uncleanly: {}", self.name, err)),
        }

        self.run_terminated_hook(hook);
        result
    }

    fn run_terminated_hook(&self, hook: Option<TerminatedHook>) {
        let Some(hook) = hook else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
            self.logger.error(&format!(
                "Termination hook panicked: {}",
                panic_message(&*payload)
            ));
        }
    }

    /// Tear down a node dropped from inside its own message handler. The
    /// receive loop cannot be joined from here; it sees the shutdown signal
    /// when the handler returns and drops its sockets on exit.
    fn abandon_from_receive_loop(&mut self) {
        let lifecycle = self.lifecycle.get_mut();
        lifecycle.shutdown.trigger();
        drop(lifecycle.worker.take());
        self.stop_handle.request_stop();

        self.state.set(NodeState::Stopped);
        let outbound = self.publisher.detach();
        lifecycle.manager.close(outbound, Vec::new());
        metrics::node_stopped();

        let hook = lifecycle.on_terminated.take();
        self.logger
            .warn(&format!("Node '{}' dropped from its own receive loop", self.name));
        self.run_terminated_hook(hook);
    }

    /// Start, run the main routine on the calling thread until it finishes,
    /// then stop.
    ///
    /// Without a main routine this does nothing.
    ///
    /// # Errors
    ///
    /// Returns start errors, a failure or panic of the main routine (after
    /// the node has been stopped), or a stop error.
    pub fn run(&self) -> Result<(), NodeError> {
        let Some(mut routine) = self.lifecycle.lock().main.take() else {
            debug!(node = %self.name, "No main routine; run() does nothing");
            return Ok(());
        };

        if let Err(err) = self.start() {
            self.lifecycle.lock().main = Some(routine);
            return Err(err);
        }

        let outcome = MainRunner::new(&mut routine, &self.stop_handle).run();
        let stopped = self.stop();

        match outcome {
            Ok(finish) => {
                debug!(node = %self.name, finish = ?finish, "Main loop ended");
                stopped
            }
            Err(err) => {
                self.logger
                    .error(&format!("Main routine of node '{}' failed: {}", self.name, err));
                if let Err(stop_err) = stopped {
                    warn!(node = %self.name, error = %stop_err, "Stop after main routine failure also failed");
                }
                Err(err)
            }
        }
    }

    /// Publish `message` on `topic`. See [`Publisher::send`].
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotRunning`] unless the node is `Running`.
    pub fn send(&self, message: impl Into<Bytes>, topic: &str) -> Result<(), SendError> {
        self.publisher.send(message, topic)
    }

    /// A cloneable publication handle.
    #[must_use]
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// A cloneable handle that ends [`Node::run`]'s main loop.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> NodeState {
        self.state.get()
    }

    /// Node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime settings.
    #[must_use]
    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    /// Actual endpoints of the publishers while running, with ephemeral
    /// TCP ports resolved.
    #[must_use]
    pub fn bound_endpoints(&self) -> Vec<Endpoint> {
        self.publisher.endpoints()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.state.get() != NodeState::Running {
            return;
        }
        match self.stop() {
            Ok(()) => {}
            Err(NodeError::StopFromReceiveLoop) => self.abandon_from_receive_loop(),
            Err(err) => warn!(node = %self.name, error = %err, "Failed to stop node on drop"),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("state", &self.state.get())
            .field("publishers", &self.publishers)
            .field("subscribers", &self.subscribers)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Builder for [`Node`].
pub struct NodeBuilder {
    name: String,
    settings: NodeSettings,
    publishers: Vec<PublisherConfig>,
    subscribers: Vec<SubscriberConfig>,
    handler: Option<MessageHandler>,
    main: Option<MainRoutine>,
    logger: Option<Arc<dyn Fn(&str) + Send + Sync + 'static>>,
    on_terminated: Option<TerminatedHook>,
    transport: Option<Arc<dyn Transport>>,
    state: Arc<StateCell>,
    publisher: Publisher,
    stop_handle: StopHandle,
}

impl NodeBuilder {
    /// Create a builder with default settings and no sockets.
    #[must_use]
    pub fn new() -> Self {
        let state = Arc::new(StateCell::new(NodeState::Idle));
        Self {
            name: DEFAULT_NODE_NAME.to_string(),
            settings: NodeSettings::default(),
            publishers: Vec::new(),
            subscribers: Vec::new(),
            handler: None,
            main: None,
            logger: None,
            on_terminated: None,
            transport: None,
            publisher: Publisher::new(Arc::clone(&state)),
            state,
            stop_handle: StopHandle::new(),
        }
    }

    /// Set the node name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a publisher.
    #[must_use]
    pub fn with_publisher(mut self, config: PublisherConfig) -> Self {
        self.publishers.push(config);
        self
    }

    /// Add a subscriber.
    #[must_use]
    pub fn with_subscriber(mut self, config: SubscriberConfig) -> Self {
        self.subscribers.push(config);
        self
    }

    /// Replace all runtime settings.
    #[must_use]
    pub fn settings(mut self, settings: NodeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the receive poll timeout.
    #[must_use]
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.settings.poll_timeout = timeout;
        self
    }

    /// Set how long `stop()` waits for the receive loop.
    #[must_use]
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.settings.join_timeout = timeout;
        self
    }

    /// Set the message handler.
    #[must_use]
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&str, &Bytes) -> HandlerResult + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Set the main routine run by [`Node::run`].
    #[must_use]
    pub fn main<F>(mut self, routine: F) -> Self
    where
        F: FnMut() -> Result<ControlFlow<()>, BoxError> + Send + 'static,
    {
        self.main = Some(Box::new(routine));
        self
    }

    /// Set a logger that receives lifecycle and failure lines.
    #[must_use]
    pub fn logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Set a hook fired once the node has stopped.
    #[must_use]
    pub fn on_terminated<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_terminated = Some(Box::new(hook));
        self
    }

    /// Use a custom transport instead of the standard `tcp://` + `inproc://`.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Publication handle of the node being built, e.g. for use inside
    /// the message handler.
    #[must_use]
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Stop handle of the node being built.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    /// Build the node. Sockets are not opened until `start()`.
    #[must_use]
    pub fn build(self) -> Node {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(MultiTransport::standard()));
        let logger = Logger::new(&self.name, self.logger);

        Node {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            name: self.name,
            settings: self.settings.normalized(),
            publishers: self.publishers,
            subscribers: self.subscribers,
            state: self.state,
            publisher: self.publisher,
            stop_handle: self.stop_handle,
            logger,
            lifecycle: Mutex::new(Lifecycle {
                manager: SocketManager::new(transport),
                worker: None,
                shutdown: ShutdownSignal::default(),
                handler: self.handler,
                main: self.main,
                on_terminated: self.on_terminated,
            }),
        }
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("name", &self.name)
            .field("publishers", &self.publishers)
            .field("subscribers", &self.subscribers)
            .field("settings", &self.settings)
            .field("handler", &self.handler.is_some())
            .field("main", &self.main.is_some())
            .finish()
    }
}
