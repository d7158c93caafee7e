//! Debugger sessions
//!
//! One session per accepted debugger connection. A session starts its own
//! backend, opens a channel to it, relays bytes in both directions and then
//! tears down whatever is still alive. The lifecycle is an explicit state
//! machine (`Starting -> Connected -> Relaying -> Closing -> Closed`).

mod relay;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use relay::{DETACH_PACKET, is_detach};
pub use state::{CloseReason, SessionState};

use crate::backend::{
    BackendChannel, BackendProcess, BackendTarget, BackendTransport, ChannelKind, SharedExecutable,
};
use crate::config::timeouts;
use crate::events::{ProxyEvent, SharedEventBus};
use crate::ledger::{LedgerEntry, ResourceKind, SharedLedger};
use relay::{Direction, PumpEnd};
use state::StateMachine;

/// Session identifier
pub type SessionId = Uuid;

/// Everything a listener hands to each of its sessions
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Port the session was accepted on
    pub port: u16,
    /// Emulator executable, resolved when the session starts its backend
    pub executable: SharedExecutable,
    /// ROM image served on the port
    pub image: PathBuf,
    /// How to reach the backend once it runs
    pub transport: Arc<dyn BackendTransport>,
    /// Shared liveness ledger
    pub ledger: SharedLedger,
    /// Diagnostics bus
    pub events: SharedEventBus,
    /// Relay chunk size
    pub buffer_size: usize,
}

impl SessionContext {
    /// Backend to start for a session accepted now
    pub fn target(&self) -> BackendTarget {
        BackendTarget::new(self.executable.read().clone(), &self.image)
    }
}

/// One debugger connection and the backend serving it
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    client: TcpStream,
    client_entry: Option<LedgerEntry>,
    context: Arc<SessionContext>,
    state: StateMachine,
}

impl Session {
    /// Wrap an accepted connection, recording its socket in the ledger
    pub fn new(context: Arc<SessionContext>, client: TcpStream, peer: SocketAddr) -> Self {
        if let Err(e) = client.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        let client_entry = context.ledger.track(
            ResourceKind::ClientSocket,
            format!("client {} on port {}", peer, context.port),
        );

        Self {
            id: Uuid::new_v4(),
            peer,
            client,
            client_entry: Some(client_entry),
            context,
            state: StateMachine::new(),
        }
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    /// Drive the session until every resource it owns is released
    pub async fn run(mut self, cancel: CancellationToken) -> CloseReason {
        let port = self.context.port;
        info!("Session {} started for {} on port {}", self.id, self.peer, port);
        self.publish(ProxyEvent::ClientConnected {
            port,
            session_id: self.id,
            peer: self.peer,
        });

        // Starting
        let target = self.context.target();
        let mut process = match BackendProcess::spawn(&target, &self.context.ledger) {
            Ok(process) => process,
            Err(e) => {
                error!("Session {}: {}", self.id, e);
                self.publish(ProxyEvent::SpawnFailed {
                    port,
                    session_id: self.id,
                    message: e.to_string(),
                });
                return self
                    .close(None, None, CloseReason::SpawnFailed(e.to_string()))
                    .await;
            }
        };
        self.publish(ProxyEvent::BackendStarted {
            port,
            session_id: self.id,
            pid: process.pid(),
        });
        self.state.advance(SessionState::Connected);

        // Connected: the client is not read until the channel is up
        let opened = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.context.transport.open(&mut process, &self.context.ledger) => Some(result),
        };
        let mut channel = match opened {
            None => {
                return self
                    .close(Some(process), None, CloseReason::Cancelled)
                    .await;
            }
            Some(Err(e)) => {
                warn!("Session {}: {}", self.id, e);
                self.publish(ProxyEvent::SecondaryConnectFailed {
                    port,
                    session_id: self.id,
                    message: e.to_string(),
                });
                return self
                    .close(
                        Some(process),
                        None,
                        CloseReason::SecondaryConnectFailed(e.to_string()),
                    )
                    .await;
            }
            Some(Ok(channel)) => channel,
        };
        if let ChannelKind::Loopback { address, attempts } = channel.kind() {
            self.publish(ProxyEvent::BackendConnected {
                port,
                session_id: self.id,
                address,
                attempts,
            });
        }
        self.state.advance(SessionState::Relaying);

        // Relaying
        let reason = self.relay(&mut process, &mut channel, &cancel).await;
        match &reason {
            CloseReason::Detached => self.publish(ProxyEvent::ClientDetached {
                port,
                session_id: self.id,
            }),
            CloseReason::ClientDisconnected => self.publish(ProxyEvent::ClientDisconnected {
                port,
                session_id: self.id,
            }),
            CloseReason::BackendExited { exit_code } => {
                error!(
                    "Session {}: backend terminated unexpectedly ({:?})",
                    self.id, exit_code
                );
                self.publish(ProxyEvent::BackendTerminated {
                    port,
                    session_id: self.id,
                    exit_code: *exit_code,
                });
            }
            _ => {}
        }

        self.close(Some(process), Some(channel), reason).await
    }

    async fn relay(
        &mut self,
        process: &mut BackendProcess,
        channel: &mut BackendChannel,
        cancel: &CancellationToken,
    ) -> CloseReason {
        let buffer_size = self.context.buffer_size;
        let (backend_reader, backend_writer) = channel.halves();
        let (mut client_reader, mut client_writer) = self.client.split();
        let mut to_backend = 0u64;
        let mut to_client = 0u64;

        let (reason, backend_closed) = {
            let upstream = relay::pump(
                &mut client_reader,
                backend_writer,
                buffer_size,
                Direction::ClientToBackend,
                &mut to_backend,
            );
            let downstream = relay::pump(
                backend_reader,
                &mut client_writer,
                buffer_size,
                Direction::BackendToClient,
                &mut to_client,
            );
            tokio::pin!(upstream, downstream);

            let ended = tokio::select! {
                end = &mut upstream => RelayEnd::Upstream(end),
                end = &mut downstream => RelayEnd::Downstream(end),
                exit = process.wait() => RelayEnd::Exited(exit.code),
                _ = cancel.cancelled() => RelayEnd::Cancelled,
            };

            match ended {
                RelayEnd::Upstream(end) => match end {
                    PumpEnd::Detached => (CloseReason::Detached, false),
                    PumpEnd::SourceClosed => (CloseReason::ClientDisconnected, false),
                    PumpEnd::ReadFailed(e) => (CloseReason::ClientError(e.to_string()), false),
                    PumpEnd::WriteFailed(e) => (CloseReason::BackendError(e.to_string()), true),
                },
                RelayEnd::Downstream(end) => match end {
                    PumpEnd::SourceClosed => (
                        CloseReason::BackendError("backend closed its channel".to_string()),
                        true,
                    ),
                    PumpEnd::ReadFailed(e) => (CloseReason::BackendError(e.to_string()), true),
                    PumpEnd::WriteFailed(e) => (CloseReason::ClientError(e.to_string()), false),
                    PumpEnd::Detached => (CloseReason::Detached, false),
                },
                RelayEnd::Exited(exit_code) => {
                    // Output the backend wrote before exiting still goes to the debugger
                    let drain = timeouts::relay::drain();
                    match tokio::time::timeout(drain, &mut downstream).await {
                        Ok(PumpEnd::SourceClosed) => {}
                        Ok(end) => debug!("Session {}: backend drain ended: {:?}", self.id, end),
                        Err(_) => warn!(
                            "Session {}: backend output not drained within {:?}",
                            self.id, drain
                        ),
                    }
                    (CloseReason::BackendExited { exit_code }, false)
                }
                RelayEnd::Cancelled => (CloseReason::Cancelled, false),
            }
        };

        debug!(
            "Session {} relayed {} bytes to backend, {} bytes to client",
            self.id, to_backend, to_client
        );

        // A broken backend channel usually means the process is gone
        if backend_closed {
            if let Ok(exit) = tokio::time::timeout(timeouts::relay::exit_grace(), process.wait()).await
            {
                return CloseReason::BackendExited {
                    exit_code: exit.code,
                };
            }
        }
        reason
    }

    async fn close(
        mut self,
        process: Option<BackendProcess>,
        channel: Option<BackendChannel>,
        reason: CloseReason,
    ) -> CloseReason {
        self.state.advance(SessionState::Closing);
        debug!("Session {} closing: {}", self.id, reason);

        if let Err(e) = self.client.shutdown().await {
            debug!("Session {}: client shutdown: {}", self.id, e);
        }
        if let Some(channel) = channel {
            channel.close().await;
        }
        if let Some(process) = process {
            process.terminate().await;
        }

        let Self {
            id,
            peer,
            client,
            client_entry,
            context,
            mut state,
        } = self;
        drop(client);
        if let Some(entry) = client_entry {
            entry.release();
        }

        state.advance(SessionState::Closed);
        info!(
            "Session {} for {} on port {} closed: {}",
            id, peer, context.port, reason
        );
        context.events.publish(ProxyEvent::SessionClosed {
            port: context.port,
            session_id: id,
            reason: reason.clone(),
        });
        reason
    }

    fn publish(&self, event: ProxyEvent) {
        self.context.events.publish(event);
    }
}

/// Which relay branch finished first
enum RelayEnd {
    Upstream(PumpEnd),
    Downstream(PumpEnd),
    Exited(Option<i32>),
    Cancelled,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("port", &self.context.port)
            .field("state", &self.state.current())
            .finish()
    }
}
