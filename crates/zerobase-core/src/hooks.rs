//! User-supplied callbacks.

use bytes::Bytes;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::Level;

use crate::error::BoxError;

/// Result returned by the message handler.
pub type HandlerResult = Result<(), BoxError>;

/// Message handler invoked on the receive loop thread for each
/// `(topic, payload)` unit.
pub type MessageHandler = Box<dyn FnMut(&str, &Bytes) -> HandlerResult + Send + 'static>;

/// Main routine invoked repeatedly by `Node::run`.
///
/// Return `ControlFlow::Continue(())` to be called again and
/// `ControlFlow::Break(())` to finish.
pub type MainRoutine = Box<dyn FnMut() -> Result<ControlFlow<()>, BoxError> + Send + 'static>;

/// Callback fired once the node has reached `Stopped`.
pub type TerminatedHook = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle logger.
///
/// Every line goes to `tracing`; if the user supplied a logger it gets the
/// same line as a formatted string.
#[derive(Clone, Default)]
pub struct Logger {
    sink: Option<Arc<dyn Fn(&str) + Send + Sync + 'static>>,
    node: Arc<str>,
}

impl Logger {
    pub(crate) fn new(node: &str, sink: Option<Arc<dyn Fn(&str) + Send + Sync + 'static>>) -> Self {
        Self {
            sink,
            node: Arc::from(node),
        }
    }

    /// Log `line` at `level`.
    pub fn log(&self, level: Level, line: &str) {
        let node = &*self.node;
        match level {
            Level::ERROR => tracing::error!(node, "{}", line),
            Level::WARN => tracing::warn!(node, "{}", line),
            Level::INFO => tracing::info!(node, "{}", line),
            Level::DEBUG => tracing::debug!(node, "{}", line),
            _ => tracing::trace!(node, "{}", line),
        }

        if let Some(sink) = &self.sink {
            sink(line);
        }
    }

    pub(crate) fn info(&self, line: &str) {
        self.log(Level::INFO, line);
    }

    pub(crate) fn warn(&self, line: &str) {
        self.log(Level::WARN, line);
    }

    pub(crate) fn error(&self, line: &str) {
        self.log(Level::ERROR, line);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("node", &self.node)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Render a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_logger_forwards_to_sink() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&lines);
        let logger = Logger::new(
            "test",
            Some(Arc::new(move |line: &str| captured.lock().push(line.to_string()))),
        );

        logger.info("Starting node");
        logger.error("boom");

        assert_eq!(*lines.lock(), vec!["Starting node", "boom"]);
    }

    #[test]
    fn test_logger_without_sink() {
        Logger::default().warn("nobody listens");
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("bad {}", 1)).unwrap_err();
        assert_eq!(panic_message(&*payload), "bad 1");

        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static");
    }
}
