//! Proxy server facade
//!
//! The control surface a front end drives: activate, deactivate and
//! reconfigure ports, subscribe to diagnostics and inspect the ledger.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

use crate::backend::{SharedExecutable, transport_for};
use crate::config::{PortConfig, ProxyConfig};
use crate::error::{ProxyError, ProxyResult};
use crate::events::{EventBus, ProxyEvent, SharedEventBus};
use crate::ledger::{Ledger, LedgerStats, SharedLedger};
use crate::registry::PortRegistry;

/// Multi-port debugger proxy
#[derive(Debug)]
pub struct ProxyServer {
    backend_executable: SharedExecutable,
    registry: Mutex<PortRegistry>,
    ledger: SharedLedger,
    events: SharedEventBus,
}

impl ProxyServer {
    /// Build a proxy from configuration; no port is opened yet
    pub fn new(config: &ProxyConfig) -> ProxyResult<Self> {
        config.validate()?;

        let ledger = Ledger::new();
        let events: SharedEventBus = Arc::new(EventBus::default());
        let transport = transport_for(config.transport, &config.relay);
        let registry = PortRegistry::new(
            config.bind_address,
            config.relay.clone(),
            transport,
            Arc::clone(&ledger),
            Arc::clone(&events),
        );

        Ok(Self {
            backend_executable: Arc::new(RwLock::new(config.backend_executable.clone())),
            registry: Mutex::new(registry),
            ledger,
            events,
        })
    }

    /// Emulator executable the next session will be started with
    pub fn backend_executable(&self) -> PathBuf {
        self.backend_executable.read().clone()
    }

    /// Change the emulator executable
    ///
    /// Applies to every session accepted afterwards on every port; running
    /// sessions keep the backend they already have.
    pub fn set_backend_executable(&self, executable: impl Into<PathBuf>) {
        let executable = executable.into();
        info!("Backend executable set to '{}'", executable.display());
        *self.backend_executable.write() = executable;
    }

    /// Activate every configured port
    ///
    /// A port that fails to bind is reported and skipped; the others stay up.
    pub async fn start(&self, servers: &[PortConfig]) -> Vec<(u16, ProxyResult<SocketAddr>)> {
        let mut results = Vec::with_capacity(servers.len());
        for server in servers {
            let result = self.activate(server.port, &server.image).await;
            if let Err(e) = &result {
                warn!("Skipping port {}: {}", server.port, e);
            }
            results.push((server.port, result));
        }
        results
    }

    /// Start serving `image` on `port`
    ///
    /// Activating a port that is already active replaces its listener.
    pub async fn activate(&self, port: u16, image: impl AsRef<Path>) -> ProxyResult<SocketAddr> {
        let config = PortConfig::new(port, image.as_ref());
        self.registry
            .lock()
            .await
            .register(&config, &self.backend_executable)
            .await
    }

    /// Stop serving `port`, closing its sessions
    pub async fn deactivate(&self, port: u16) -> ProxyResult<()> {
        if self.registry.lock().await.unregister(port).await {
            Ok(())
        } else {
            Err(ProxyError::PortNotActive(port))
        }
    }

    /// Serve a different image on an active port
    ///
    /// Old sessions are gone before the new listener accepts. If the new bind
    /// fails the port stays inactive.
    pub async fn reconfigure(&self, port: u16, image: impl AsRef<Path>) -> ProxyResult<SocketAddr> {
        let mut registry = self.registry.lock().await;
        if !registry.is_active(port) {
            return Err(ProxyError::PortNotActive(port));
        }
        info!("Reconfiguring port {} to '{}'", port, image.as_ref().display());
        registry
            .register(&PortConfig::new(port, image.as_ref()), &self.backend_executable)
            .await
    }

    /// Move a server from `old_port` to `new_port`, optionally with a new image
    pub async fn move_port(
        &self,
        old_port: u16,
        new_port: u16,
        image: impl AsRef<Path>,
    ) -> ProxyResult<SocketAddr> {
        let mut registry = self.registry.lock().await;
        if !registry.unregister(old_port).await {
            warn!("Moving port {} which was not active", old_port);
        }
        registry
            .register(&PortConfig::new(new_port, image.as_ref()), &self.backend_executable)
            .await
    }

    /// Active ports, ascending
    pub async fn ports(&self) -> Vec<u16> {
        self.registry.lock().await.ports()
    }

    /// Whether `port` is being served
    pub async fn is_active(&self, port: u16) -> bool {
        self.registry.lock().await.is_active(port)
    }

    /// Address the listener on `port` is bound to
    pub async fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        self.registry.lock().await.local_addr(port)
    }

    /// Image served on `port`
    pub async fn image(&self, port: u16) -> Option<PathBuf> {
        self.registry
            .lock()
            .await
            .image(port)
            .map(Path::to_path_buf)
    }

    /// Live sessions on `port`
    pub async fn session_count(&self, port: u16) -> usize {
        self.registry.lock().await.session_count(port)
    }

    /// Subscribe to diagnostics
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.events.subscribe()
    }

    /// Shared liveness ledger
    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    /// Tear down every port and report what, if anything, is still tracked
    pub async fn shutdown(&self) -> LedgerStats {
        self.registry.lock().await.shutdown().await;

        let stats = self.ledger.stats();
        if stats.is_clean() {
            info!(
                "All {} backend(s) and {} socket(s) released",
                stats.processes_released, stats.sockets_released
            );
        } else {
            warn!(
                "Resources still tracked after shutdown: {:?}",
                self.ledger.live_labels()
            );
        }
        stats
    }
}
