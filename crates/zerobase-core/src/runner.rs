//! Main routine runner and stop handle.

use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::{BoxError, NodeError};
use crate::hooks::{panic_message, MainRoutine};

/// Cloneable request to stop a node's main loop.
///
/// `request_stop` is a single atomic store, so it may be called from signal
/// handlers, the message handler or any other thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    /// Create a handle with no stop requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the main loop to finish after the current iteration.
    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Why the main loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finish {
    /// The routine returned `Break`.
    Completed,
    /// A stop was requested through the [`StopHandle`].
    StopRequested,
}

/// Invokes the main routine until it breaks, fails or a stop is requested.
pub(crate) struct MainRunner<'a> {
    routine: &'a mut MainRoutine,
    stop: &'a StopHandle,
}

impl<'a> MainRunner<'a> {
    pub(crate) fn new(routine: &'a mut MainRoutine, stop: &'a StopHandle) -> Self {
        Self { routine, stop }
    }

    pub(crate) fn run(self) -> Result<Finish, NodeError> {
        let mut iterations: u64 = 0;

        loop {
            if self.stop.is_stop_requested() {
                debug!(iterations, "Main loop stopped on request");
                return Ok(Finish::StopRequested);
            }

            let routine = &mut *self.routine;
            let outcome = panic::catch_unwind(AssertUnwindSafe(routine));
            iterations += 1;

            match outcome {
                Ok(Ok(ControlFlow::Continue(()))) => {}
                Ok(Ok(ControlFlow::Break(()))) => {
                    debug!(iterations, "Main routine finished");
                    return Ok(Finish::Completed);
                }
                Ok(Err(err)) => return Err(NodeError::MainRoutine(err)),
                Err(payload) => {
                    let err: BoxError =
                        format!("main routine panicked: {}", panic_message(&*payload)).into();
                    return Err(NodeError::MainRoutine(err));
                }
            }
        }
    }
}
