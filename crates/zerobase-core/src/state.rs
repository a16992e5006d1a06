//! Node lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a node.
///
/// `Idle -> Running -> Stopped`. There is no way back from `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeState {
    /// Constructed, sockets not open.
    Idle = 0,
    /// Sockets open, receive loop running.
    Running = 1,
    /// Sockets closed. Terminal.
    Stopped = 2,
}

impl NodeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared, lock-free view of a node's state.
///
/// Transitions are written under the node's lifecycle lock; readers such as
/// the publisher only load it.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: NodeState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> NodeState {
        NodeState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: NodeState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_transitions() {
        let cell = StateCell::new(NodeState::Idle);
        assert_eq!(cell.get(), NodeState::Idle);
        cell.set(NodeState::Running);
        assert_eq!(cell.get(), NodeState::Running);
        cell.set(NodeState::Stopped);
        assert_eq!(cell.get(), NodeState::Stopped);
    }

    #[test]
    fn test_display() {
        assert_eq!(NodeState::Running.to_string(), "running");
    }
}
