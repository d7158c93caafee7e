//! Port registry
//!
//! Maps each served port to a listener. A listener owns its accept loop and
//! every session accepted on it; tearing a listener down cancels and awaits
//! all of them, so once `unregister` returns nothing of that port is alive.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendTransport, SharedExecutable};
use crate::config::{PortConfig, RelayConfig, timeouts};
use crate::error::{ProxyError, ProxyResult};
use crate::events::{ProxyEvent, SharedEventBus};
use crate::ledger::SharedLedger;
use crate::session::{CloseReason, Session, SessionContext, SessionId};

type SessionMap = Arc<Mutex<HashMap<SessionId, JoinHandle<CloseReason>>>>;

/// A bound port with its accept loop and live sessions
struct Listener {
    address: SocketAddr,
    image: PathBuf,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
    sessions: SessionMap,
}

impl Listener {
    fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Stop accepting, then cancel and await every session
    async fn shutdown(self) -> usize {
        self.cancel.cancel();
        if let Err(e) = self.accept_task.await {
            warn!("Accept loop on {} ended abnormally: {}", self.address, e);
        }

        let handles: Vec<_> = self.sessions.lock().drain().collect();
        let count = handles.len();
        for (id, handle) in handles {
            match handle.await {
                Ok(reason) => debug!("Session {} ended: {}", id, reason),
                Err(e) => warn!("Session {} task failed: {}", id, e),
            }
        }
        count
    }
}

/// Listeners keyed by port
pub struct PortRegistry {
    bind_address: IpAddr,
    relay: RelayConfig,
    transport: Arc<dyn BackendTransport>,
    ledger: SharedLedger,
    events: SharedEventBus,
    listeners: HashMap<u16, Listener>,
}

impl PortRegistry {
    /// Create an empty registry
    pub fn new(
        bind_address: IpAddr,
        relay: RelayConfig,
        transport: Arc<dyn BackendTransport>,
        ledger: SharedLedger,
        events: SharedEventBus,
    ) -> Self {
        Self {
            bind_address,
            relay,
            transport,
            ledger,
            events,
            listeners: HashMap::new(),
        }
    }

    /// Bind `config.port` and start accepting debugger connections
    ///
    /// An existing listener on the same port is torn down first, sessions
    /// included. If the new bind fails the port is left inactive.
    pub async fn register(
        &mut self,
        config: &PortConfig,
        executable: &SharedExecutable,
    ) -> ProxyResult<SocketAddr> {
        self.unregister(config.port).await;

        let listener = TcpListener::bind((self.bind_address, config.port))
            .await
            .map_err(|e| ProxyError::bind_failed(config.port, e.to_string()))?;
        let address = listener
            .local_addr()
            .map_err(|e| ProxyError::bind_failed(config.port, e.to_string()))?;

        let context = Arc::new(SessionContext {
            port: config.port,
            executable: Arc::clone(executable),
            image: config.image.clone(),
            transport: Arc::clone(&self.transport),
            ledger: Arc::clone(&self.ledger),
            events: Arc::clone(&self.events),
            buffer_size: self.relay.buffer_size,
        });
        let cancel = CancellationToken::new();
        let sessions: SessionMap = Arc::new(Mutex::new(HashMap::new()));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            context,
            cancel.clone(),
            Arc::clone(&sessions),
        ));

        info!(
            "Listening on {} for image '{}'",
            address,
            config.image.display()
        );
        self.events.publish(ProxyEvent::ListenerStarted {
            port: config.port,
            address,
            image: config.image.clone(),
        });

        self.listeners.insert(
            config.port,
            Listener {
                address,
                image: config.image.clone(),
                cancel,
                accept_task,
                sessions,
            },
        );
        Ok(address)
    }

    /// Tear down the listener on `port` and all its sessions
    ///
    /// Returns false when nothing was listening there.
    pub async fn unregister(&mut self, port: u16) -> bool {
        let Some(listener) = self.listeners.remove(&port) else {
            return false;
        };

        let address = listener.address;
        let sessions_closed = listener.shutdown().await;
        info!(
            "Stopped listening on {} ({} session(s) closed)",
            address, sessions_closed
        );
        self.events.publish(ProxyEvent::ListenerStopped {
            port,
            sessions_closed,
        });
        true
    }

    /// Whether `port` has a listener
    pub fn is_active(&self, port: u16) -> bool {
        self.listeners.contains_key(&port)
    }

    /// Active ports, ascending
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.listeners.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Live sessions on `port`
    pub fn session_count(&self, port: u16) -> usize {
        self.listeners
            .get(&port)
            .map(Listener::session_count)
            .unwrap_or(0)
    }

    /// Address the listener on `port` is bound to
    pub fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        self.listeners.get(&port).map(|l| l.address)
    }

    /// Image served on `port`
    pub fn image(&self, port: u16) -> Option<&Path> {
        self.listeners.get(&port).map(|l| l.image.as_path())
    }

    /// Tear down every listener
    pub async fn shutdown(&mut self) {
        for port in self.ports() {
            self.unregister(port).await;
        }
    }
}

impl std::fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortRegistry")
            .field("bind_address", &self.bind_address)
            .field("ports", &self.ports())
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<SessionContext>,
    cancel: CancellationToken,
    sessions: SessionMap,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept on port {} failed: {}", context.port, e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(timeouts::listener::accept_retry()) => continue,
                    }
                }
            },
        };

        let session = Session::new(Arc::clone(&context), stream, peer);
        let id = session.id();
        let session_cancel = cancel.child_token();
        let owned = Arc::clone(&sessions);

        // Lock held across spawn: the session must be inserted before it can remove itself
        {
            let mut live = sessions.lock();
            let handle = tokio::spawn(async move {
                let reason = session.run(session_cancel).await;
                owned.lock().remove(&id);
                reason
            });
            live.insert(id, handle);
        }
    }

    debug!("Accept loop on port {} stopped", context.port);
}
