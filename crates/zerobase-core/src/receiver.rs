//! Background receive loop.
//!
//! One dedicated thread per running node polls every inbound socket with a
//! bounded timeout and hands each unit to the message handler. Handler
//! errors and panics are contained here; the loop only exits when the
//! shutdown signal is set.

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use futures_util::future::select_all;
use std::cell::Cell;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};
use zerobase_transport::{Envelope, SubSocket, TransportError};

use crate::error::NodeError;
use crate::hooks::{panic_message, Logger, MessageHandler};
use crate::metrics;

thread_local! {
    /// Id of the node whose receive loop runs on this thread.
    static RECEIVE_LOOP_OF: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Whether the current thread is the receive loop of node `node_id`.
pub(crate) fn on_receive_thread(node_id: u64) -> bool {
    RECEIVE_LOOP_OF.with(|owner| owner.get() == Some(node_id))
}

/// Flag telling the receive loop to exit. Set once by `stop()`.
#[derive(Debug, Clone, Default)]
pub(crate) struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub(crate) fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

enum Poll {
    Idle,
    Message(Envelope),
    Closed(usize),
    Failed(usize, TransportError),
}

/// Receive loop state, moved onto the worker thread.
pub(crate) struct ReceiveLoop {
    live: Vec<Box<dyn SubSocket>>,
    retired: Vec<Box<dyn SubSocket>>,
    /// Live socket polled first on the next poll.
    cursor: usize,
    handler: Option<MessageHandler>,
    shutdown: ShutdownSignal,
    poll_timeout: Duration,
    logger: Logger,
    runtime: Handle,
}

impl ReceiveLoop {
    pub(crate) fn new(
        sockets: Vec<Box<dyn SubSocket>>,
        handler: Option<MessageHandler>,
        shutdown: ShutdownSignal,
        poll_timeout: Duration,
        logger: Logger,
        runtime: Handle,
    ) -> Self {
        Self {
            live: sockets,
            retired: Vec::new(),
            cursor: 0,
            handler,
            shutdown,
            poll_timeout,
            logger,
            runtime,
        }
    }

    /// Run until the shutdown signal is set, then hand the sockets back.
    pub(crate) fn run(mut self) -> Vec<Box<dyn SubSocket>> {
        debug!(sockets = self.live.len(), "Receive loop started");

        while !self.shutdown.is_triggered() {
            match self.poll() {
                Poll::Idle => {}
                Poll::Message(envelope) => {
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    self.dispatch(&envelope);
                }
                Poll::Closed(index) => {
                    let socket = self.retire(index);
                    debug!(endpoint = %socket.endpoint(), "Subscriber socket closed");
                    self.retired.push(socket);
                }
                Poll::Failed(index, err) => {
                    let socket = self.retire(index);
                    warn!(endpoint = %socket.endpoint(), error = %err, "Subscriber socket failed");
                    self.logger
                        .warn(&format!("Subscriber on {} failed: {}", socket.endpoint(), err));
                    self.retired.push(socket);
                }
            }
        }

        debug!("Receive loop exiting");
        let mut sockets = self.live;
        sockets.append(&mut self.retired);
        sockets
    }

    /// Wait up to `poll_timeout` for one unit from any live socket.
    ///
    /// Polling starts at `cursor` and the cursor moves past whichever socket
    /// produced, so a socket that is always ready cannot starve the others.
    fn poll(&mut self) -> Poll {
        let count = self.live.len();
        if count == 0 {
            thread::sleep(self.poll_timeout);
            return Poll::Idle;
        }

        let start = self.cursor % count;
        let (head, tail) = self.live.split_at_mut(start);
        let ready = select_all(tail.iter_mut().chain(head.iter_mut()).map(|socket| socket.recv()));
        let poll_timeout = self.poll_timeout;
        let outcome = self
            .runtime
            .block_on(async move { tokio::time::timeout(poll_timeout, ready).await });

        let Ok((result, offset, _)) = outcome else {
            return Poll::Idle;
        };
        let index = (start + offset) % count;
        self.cursor = index + 1;
        match result {
            Ok(Some(envelope)) => Poll::Message(envelope),
            Ok(None) => Poll::Closed(index),
            Err(err) => Poll::Failed(index, err),
        }
    }

    /// Take back the sockets and the handler of a loop that never ran.
    pub(crate) fn into_parts(mut self) -> (Vec<Box<dyn SubSocket>>, Option<MessageHandler>) {
        self.live.append(&mut self.retired);
        (self.live, self.handler)
    }

    fn retire(&mut self, index: usize) -> Box<dyn SubSocket> {
        let socket = self.live.remove(index);
        self.cursor = index;
        socket
    }

    fn dispatch(&mut self, envelope: &Envelope) {
        trace!(topic = %envelope.topic, len = envelope.payload.len(), "Dispatching");
        metrics::record_received(envelope.payload.len());

        let Some(handler) = self.handler.as_mut() else {
            return;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handler(&envelope.topic, &envelope.payload)
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                metrics::record_callback_failure("error");
                self.logger.error(&format!(
                    "Message handler failed on topic '{}': {}",
                    envelope.topic, err
                ));
            }
            Err(payload) => {
                metrics::record_callback_failure("panic");
                self.logger.error(&format!(
                    "Message handler panicked on topic '{}': {}",
                    envelope.topic,
                    panic_message(&*payload)
                ));
            }
        }
    }
}

type LoopThread = JoinHandle<Vec<Box<dyn SubSocket>>>;
type LoopBody = Box<dyn FnOnce() -> Vec<Box<dyn SubSocket>> + Send>;

/// A receive loop whose thread could not be started. The loop is handed
/// back untouched.
pub(crate) struct SpawnFailure {
    pub(crate) error: NodeError,
    pub(crate) receive_loop: ReceiveLoop,
}

impl fmt::Debug for SpawnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnFailure")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Handle to a running receive loop thread.
pub(crate) struct ReceiveWorker {
    thread: LoopThread,
    done: Receiver<()>,
}

impl ReceiveWorker {
    /// Spawn `receive_loop` on a thread named `<node>-recv`.
    pub(crate) fn spawn(
        node: &str,
        node_id: u64,
        receive_loop: ReceiveLoop,
    ) -> Result<Self, SpawnFailure> {
        let builder = thread::Builder::new().name(format!("{node}-recv"));
        Self::launch(node_id, receive_loop, |body| builder.spawn(body))
    }

    /// Start a thread through `spawn`, then hand it the loop. The loop only
    /// leaves this function once the thread exists.
    fn launch(
        node_id: u64,
        receive_loop: ReceiveLoop,
        spawn: impl FnOnce(LoopBody) -> io::Result<LoopThread>,
    ) -> Result<Self, SpawnFailure> {
        // Dropped when the thread exits, including by unwinding.
        let (done_tx, done) = channel::bounded::<()>(0);
        let (hand_over, handed) = channel::bounded::<ReceiveLoop>(1);

        let body: LoopBody = Box::new(move || {
            let _done = done_tx;
            RECEIVE_LOOP_OF.with(|owner| owner.set(Some(node_id)));
            match handed.recv() {
                Ok(receive_loop) => receive_loop.run(),
                Err(_) => Vec::new(),
            }
        });

        let thread = match spawn(body) {
            Ok(thread) => thread,
            Err(err) => {
                return Err(SpawnFailure {
                    error: NodeError::Spawn(err),
                    receive_loop,
                })
            }
        };
        if let Err(channel::SendError(receive_loop)) = hand_over.send(receive_loop) {
            return Err(SpawnFailure {
                error: NodeError::WorkerPanicked,
                receive_loop,
            });
        }

        Ok(Self { thread, done })
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// On timeout the thread is detached; it still closes its sockets when it
    /// eventually returns.
    pub(crate) fn join(self, timeout: Duration) -> Result<Vec<Box<dyn SubSocket>>, NodeError> {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "Receive loop did not exit in time");
                Err(NodeError::ShutdownTimeout(timeout))
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.thread.join().map_err(|_| NodeError::WorkerPanicked)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Instant;
    use tokio::runtime::{Builder, Runtime};
    use zerobase_transport::Endpoint;

    /// Socket that replays a fixed script, then idles or reports closed.
    struct ScriptedSocket {
        endpoint: Endpoint,
        script: VecDeque<Envelope>,
        close_when_drained: bool,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedSocket {
        fn new(units: &[(&str, &str)], close_when_drained: bool) -> Self {
            Self {
                endpoint: Endpoint::inproc("scripted"),
                script: units
                    .iter()
                    .map(|(topic, payload)| Envelope::new(*topic, payload.as_bytes().to_vec()))
                    .collect(),
                close_when_drained,
                closed: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl SubSocket for ScriptedSocket {
        fn endpoint(&self) -> &Endpoint {
            &self.endpoint
        }

        fn topics(&self) -> &[String] {
            &[]
        }

        async fn recv(&mut self) -> Result<Option<Envelope>, TransportError> {
            if let Some(envelope) = self.script.pop_front() {
                return Ok(Some(envelope));
            }
            if self.close_when_drained {
                return Ok(None);
            }
            futures_util::future::pending().await
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Socket that always has another unit ready.
    struct FloodSocket {
        endpoint: Endpoint,
    }

    #[async_trait]
    impl SubSocket for FloodSocket {
        fn endpoint(&self) -> &Endpoint {
            &self.endpoint
        }

        fn topics(&self) -> &[String] {
            &[]
        }

        async fn recv(&mut self) -> Result<Option<Envelope>, TransportError> {
            Ok(Some(Envelope::new("flood", b"x".to_vec())))
        }

        fn close(&mut self) {}
    }

    fn runtime() -> Runtime {
        Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    fn collecting_handler(seen: Arc<Mutex<Vec<(String, Bytes)>>>) -> MessageHandler {
        Box::new(move |topic: &str, payload: &Bytes| {
            seen.lock().push((topic.to_string(), payload.clone()));
            Ok(())
        })
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_dispatches_in_delivery_order() {
        let rt = runtime();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let shutdown = ShutdownSignal::default();
        let receive_loop = ReceiveLoop::new(
            vec![Box::new(ScriptedSocket::new(&[("A", "1"), ("B", "2"), ("A", "3")], false))],
            Some(collecting_handler(Arc::clone(&seen))),
            shutdown.clone(),
            Duration::from_millis(10),
            Logger::default(),
            rt.handle().clone(),
        );

        let worker = ReceiveWorker::spawn("order", 1, receive_loop).unwrap();
        wait_for(|| seen.lock().len() == 3);
        shutdown.trigger();
        let sockets = worker.join(Duration::from_secs(2)).unwrap();

        assert_eq!(sockets.len(), 1);
        let topics: Vec<_> = seen.lock().iter().map(|(t, p)| format!("{t}{}", String::from_utf8_lossy(p))).collect();
        assert_eq!(topics, vec!["A1", "B2", "A3"]);
    }

    #[test]
    fn test_handler_failures_do_not_stop_the_loop() {
        let rt = runtime();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let shutdown = ShutdownSignal::default();

        let seen_by_handler = Arc::clone(&seen);
        let handler: MessageHandler = Box::new(move |_topic: &str, payload: &Bytes| {
            match &payload[..] {
                b"err" => Err("rejected".into()),
                b"panic" => panic!("handler exploded"),
                other => {
                    seen_by_handler.lock().push(other.to_vec());
                    Ok(())
                }
            }
        });
        let captured = Arc::clone(&lines);
        let logger = Logger::new(
            "failures",
            Some(Arc::new(move |line: &str| captured.lock().push(line.to_string()))),
        );

        let receive_loop = ReceiveLoop::new(
            vec![Box::new(ScriptedSocket::new(
                &[("A", "err"), ("A", "ok1"), ("A", "panic"), ("A", "ok2")],
                false,
            ))],
            Some(handler),
            shutdown.clone(),
            Duration::from_millis(10),
            logger,
            rt.handle().clone(),
        );

        let worker = ReceiveWorker::spawn("failures", 1, receive_loop).unwrap();
        wait_for(|| seen.lock().len() == 2);
        shutdown.trigger();
        worker.join(Duration::from_secs(2)).unwrap();

        assert_eq!(*seen.lock(), vec![b"ok1".to_vec(), b"ok2".to_vec()]);
        let lines = lines.lock();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("rejected"));
        assert!(lines[1].contains("handler exploded"));
    }

    #[test]
    fn test_closed_sockets_are_retired() {
        let rt = runtime();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let shutdown = ShutdownSignal::default();
        let receive_loop = ReceiveLoop::new(
            vec![
                Box::new(ScriptedSocket::new(&[("A", "1")], true)),
                Box::new(ScriptedSocket::new(&[("B", "2")], false)),
            ],
            Some(collecting_handler(Arc::clone(&seen))),
            shutdown.clone(),
            Duration::from_millis(10),
            Logger::default(),
            rt.handle().clone(),
        );

        let worker = ReceiveWorker::spawn("retire", 1, receive_loop).unwrap();
        wait_for(|| seen.lock().len() == 2);
        thread::sleep(Duration::from_millis(30));
        shutdown.trigger();

        assert_eq!(worker.join(Duration::from_secs(2)).unwrap().len(), 2);
    }

    #[test]
    fn test_stop_latency_bounded_by_poll_timeout() {
        let rt = runtime();
        let shutdown = ShutdownSignal::default();
        let receive_loop = ReceiveLoop::new(
            vec![Box::new(ScriptedSocket::new(&[], false))],
            None,
            shutdown.clone(),
            Duration::from_millis(50),
            Logger::default(),
            rt.handle().clone(),
        );

        let worker = ReceiveWorker::spawn("latency", 1, receive_loop).unwrap();
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        shutdown.trigger();
        worker.join(Duration::from_secs(2)).unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_join_times_out_on_stuck_handler() {
        let rt = runtime();
        let shutdown = ShutdownSignal::default();
        let release = Arc::new(AtomicBool::new(false));
        let release_handler = Arc::clone(&release);
        let handler: MessageHandler = Box::new(move |_: &str, _: &Bytes| {
            while !release_handler.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        });

        let receive_loop = ReceiveLoop::new(
            vec![Box::new(ScriptedSocket::new(&[("A", "stuck")], false))],
            Some(handler),
            shutdown.clone(),
            Duration::from_millis(10),
            Logger::default(),
            rt.handle().clone(),
        );

        let worker = ReceiveWorker::spawn("stuck", 1, receive_loop).unwrap();
        thread::sleep(Duration::from_millis(50));
        shutdown.trigger();

        let err = worker.join(Duration::from_millis(50)).err().unwrap();
        assert!(matches!(err, NodeError::ShutdownTimeout(_)));
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_no_sockets_still_observes_shutdown() {
        let rt = runtime();
        let shutdown = ShutdownSignal::default();
        let receive_loop = ReceiveLoop::new(
            Vec::new(),
            None,
            shutdown.clone(),
            Duration::from_millis(10),
            Logger::default(),
            rt.handle().clone(),
        );

        let worker = ReceiveWorker::spawn("empty", 1, receive_loop).unwrap();
        shutdown.trigger();
        assert!(worker.join(Duration::from_secs(2)).unwrap().is_empty());
    }

    #[test]
    fn test_busy_socket_does_not_starve_quiet_one() {
        let rt = runtime();
        let quiet = Arc::new(Mutex::new(Vec::new()));
        let shutdown = ShutdownSignal::default();

        let quiet_seen = Arc::clone(&quiet);
        let handler: MessageHandler = Box::new(move |topic: &str, payload: &Bytes| {
            if topic == "quiet" {
                quiet_seen.lock().push(payload.clone());
            }
            Ok(())
        });

        let receive_loop = ReceiveLoop::new(
            vec![
                Box::new(FloodSocket {
                    endpoint: Endpoint::inproc("flood"),
                }),
                Box::new(ScriptedSocket::new(&[("quiet", "1"), ("quiet", "2")], false)),
            ],
            Some(handler),
            shutdown.clone(),
            Duration::from_millis(10),
            Logger::default(),
            rt.handle().clone(),
        );

        let worker = ReceiveWorker::spawn("flood", 1, receive_loop).unwrap();
        wait_for(|| quiet.lock().len() == 2);
        shutdown.trigger();
        worker.join(Duration::from_secs(2)).unwrap();

        assert_eq!(*quiet.lock(), vec![Bytes::from_static(b"1"), Bytes::from_static(b"2")]);
    }

    #[test]
    fn test_failed_launch_hands_back_sockets_and_handler() {
        let rt = runtime();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let receive_loop = ReceiveLoop::new(
            vec![Box::new(ScriptedSocket::new(&[], false))],
            Some(collecting_handler(Arc::clone(&seen))),
            ShutdownSignal::default(),
            Duration::from_millis(10),
            Logger::default(),
            rt.handle().clone(),
        );

        let failure = match ReceiveWorker::launch(1, receive_loop, |_| {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "thread limit reached"))
        }) {
            Err(failure) => failure,
            Ok(_) => panic!("launch should have failed"),
        };
        assert!(matches!(failure.error, NodeError::Spawn(_)));

        let (sockets, handler) = failure.receive_loop.into_parts();
        assert_eq!(sockets.len(), 1);
        let mut handler = handler.expect("handler survives a failed launch");
        handler("A", &Bytes::from_static(b"kept")).unwrap();
        assert_eq!(seen.lock().len(), 1);
    }
}
