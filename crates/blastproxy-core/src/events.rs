//! Diagnostic events
//!
//! Broadcast-based bus through which the core reports what happens on each
//! port: listeners coming and going, sessions opening and closing, backends
//! failing to start or crashing. The front end subscribes and displays them;
//! the core never depends on anyone listening.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::timeouts;
use crate::session::{CloseReason, SessionId};

/// Everything the core reports to the outside
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyEvent {
    /// A listener is accepting debugger connections
    ListenerStarted {
        port: u16,
        address: SocketAddr,
        image: PathBuf,
    },

    /// A listener and all its sessions were torn down
    ListenerStopped { port: u16, sessions_closed: usize },

    /// A debugger connected and a session was created
    ClientConnected {
        port: u16,
        session_id: SessionId,
        peer: SocketAddr,
    },

    /// The backend process is running
    BackendStarted {
        port: u16,
        session_id: SessionId,
        pid: Option<u32>,
    },

    /// The backend process could not be created
    SpawnFailed {
        port: u16,
        session_id: SessionId,
        message: String,
    },

    /// The loopback connection to the backend debug port is up
    BackendConnected {
        port: u16,
        session_id: SessionId,
        address: SocketAddr,
        attempts: u32,
    },

    /// The loopback connection to the backend debug port never came up
    SecondaryConnectFailed {
        port: u16,
        session_id: SessionId,
        message: String,
    },

    /// The backend process ended on its own while the session was live
    BackendTerminated {
        port: u16,
        session_id: SessionId,
        exit_code: Option<i32>,
    },

    /// The debugger sent the detach packet
    ClientDetached { port: u16, session_id: SessionId },

    /// The debugger closed its connection
    ClientDisconnected { port: u16, session_id: SessionId },

    /// A session released all of its resources
    SessionClosed {
        port: u16,
        session_id: SessionId,
        reason: CloseReason,
    },
}

impl ProxyEvent {
    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ListenerStarted { .. } => "listener_started",
            Self::ListenerStopped { .. } => "listener_stopped",
            Self::ClientConnected { .. } => "client_connected",
            Self::BackendStarted { .. } => "backend_started",
            Self::SpawnFailed { .. } => "spawn_failed",
            Self::BackendConnected { .. } => "backend_connected",
            Self::SecondaryConnectFailed { .. } => "secondary_connect_failed",
            Self::BackendTerminated { .. } => "backend_terminated",
            Self::ClientDetached { .. } => "client_detached",
            Self::ClientDisconnected { .. } => "client_disconnected",
            Self::SessionClosed { .. } => "session_closed",
        }
    }

    /// Port the event belongs to
    pub fn port(&self) -> u16 {
        match self {
            Self::ListenerStarted { port, .. }
            | Self::ListenerStopped { port, .. }
            | Self::ClientConnected { port, .. }
            | Self::BackendStarted { port, .. }
            | Self::SpawnFailed { port, .. }
            | Self::BackendConnected { port, .. }
            | Self::SecondaryConnectFailed { port, .. }
            | Self::BackendTerminated { port, .. }
            | Self::ClientDetached { port, .. }
            | Self::ClientDisconnected { port, .. }
            | Self::SessionClosed { port, .. } => *port,
        }
    }

    /// Whether the event reports a failure the user should see
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailed { .. }
                | Self::SecondaryConnectFailed { .. }
                | Self::BackendTerminated { .. }
        )
    }
}

/// Event bus for proxy diagnostics
///
/// Uses a broadcast channel; each subscriber receives a copy of every event
/// published after it subscribed.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProxyEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event, returning the number of subscribers reached
    pub fn publish(&self, event: ProxyEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(timeouts::events::BUS_CAPACITY)
    }
}

/// Shared handle to an event bus
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new(16);
        let mut subscriber = bus.subscribe();

        let sent = bus.publish(ProxyEvent::ListenerStopped {
            port: 2345,
            sessions_closed: 0,
        });
        assert_eq!(sent, 1);

        let event = subscriber.recv().await.unwrap();
        assert_eq!(event.event_type(), "listener_stopped");
        assert_eq!(event.port(), 2345);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        let sent = bus.publish(ProxyEvent::ClientDetached {
            port: 1,
            session_id: Uuid::new_v4(),
        });
        assert_eq!(sent, 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_error_classification() {
        let id = Uuid::new_v4();
        assert!(ProxyEvent::SpawnFailed {
            port: 1,
            session_id: id,
            message: "missing".into(),
        }
        .is_error());
        assert!(!ProxyEvent::ClientDisconnected {
            port: 1,
            session_id: id,
        }
        .is_error());
    }
}
