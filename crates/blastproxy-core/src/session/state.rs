//! Session lifecycle states

use std::fmt;

use tracing::warn;

/// Lifecycle of one debugger session
///
/// States only move forward; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Accepted; backend being spawned
    Starting,
    /// Backend running; channel being opened
    Connected,
    /// Bytes flowing both ways
    Relaying,
    /// Tearing down whichever side is still alive
    Closing,
    /// Every resource released
    Closed,
}

impl SessionState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Starting, Connected)
                | (Starting, Closing)
                | (Connected, Relaying)
                | (Connected, Closing)
                | (Relaying, Closing)
                | (Closing, Closed)
        )
    }

    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Connected => write!(f, "connected"),
            Self::Relaying => write!(f, "relaying"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Guarded holder of the current state
#[derive(Debug)]
pub(crate) struct StateMachine {
    state: SessionState,
}

impl StateMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: SessionState::Starting,
        }
    }

    pub(crate) fn current(&self) -> SessionState {
        self.state
    }

    /// Move to `next`; illegal transitions are refused and logged
    pub(crate) fn advance(&mut self, next: SessionState) -> bool {
        if self.state.can_advance_to(next) {
            self.state = next;
            true
        } else {
            warn!("Refusing session transition {} -> {}", self.state, next);
            false
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The backend could not be started
    SpawnFailed(String),
    /// The loopback connection to the backend never came up
    SecondaryConnectFailed(String),
    /// The debugger sent the detach packet
    Detached,
    /// The debugger closed its connection
    ClientDisconnected,
    /// Reading from or writing to the debugger failed
    ClientError(String),
    /// The backend process exited on its own
    BackendExited { exit_code: Option<i32> },
    /// Reading from or writing to the backend failed, or it closed its end
    BackendError(String),
    /// The listener was removed or reconfigured
    Cancelled,
}

impl CloseReason {
    /// Whether the session ended because something went wrong
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailed(_)
                | Self::SecondaryConnectFailed(_)
                | Self::ClientError(_)
                | Self::BackendExited { .. }
                | Self::BackendError(_)
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpawnFailed(msg) => write!(f, "spawn failed: {}", msg),
            Self::SecondaryConnectFailed(msg) => write!(f, "backend connect failed: {}", msg),
            Self::Detached => write!(f, "debugger detached"),
            Self::ClientDisconnected => write!(f, "debugger disconnected"),
            Self::ClientError(msg) => write!(f, "client error: {}", msg),
            Self::BackendExited {
                exit_code: Some(code),
            } => write!(f, "backend exited with code {}", code),
            Self::BackendExited { exit_code: None } => write!(f, "backend killed by signal"),
            Self::BackendError(msg) => write!(f, "backend error: {}", msg),
            Self::Cancelled => write!(f, "listener closed"),
        }
    }
}
