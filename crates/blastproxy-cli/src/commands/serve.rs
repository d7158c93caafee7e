//! The `serve` command

use std::path::Path;

use anyhow::{Context, Result, bail};
use blastproxy_core::config::load_from_file;
use blastproxy_core::{ProxyConfig, ProxyEvent, ProxyServer};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::console::CliConsole;
use crate::signal_handler::ShutdownSignal;
use crate::watcher::{self, ConfigWatcher, PortChange};

/// Serve every configured port until a termination signal arrives
pub async fn serve(config_file: &Path, watch: bool) -> Result<()> {
    let console = CliConsole::new(true);
    let mut current = load_from_file(config_file)
        .with_context(|| format!("failed to load {}", config_file.display()))?;

    if current.backend_executable.as_os_str().is_empty() {
        console.warn(
            "Backend executable not set; sessions will fail until `blastproxy set-backend` is run",
        );
    }
    if current.servers.is_empty() && !watch {
        console.warn("No servers configured; add one with `blastproxy add <port> <image>`");
    }

    let server = ProxyServer::new(&current).context("invalid configuration")?;
    let event_log = spawn_event_log(server.subscribe());

    for (port, result) in server.start(&current.servers).await {
        match result {
            Ok(address) => console.success(&format!("Port {} listening on {}", port, address)),
            Err(e) => console.error(&format!("Port {} skipped: {}", port, e)),
        }
    }
    current = served(&server, current).await;

    let mut signals = ShutdownSignal::new().context("failed to install signal handler")?;
    let mut watcher = if watch {
        let watcher = ConfigWatcher::new(config_file, watcher::DEBOUNCE)?;
        console.info(&format!("Watching {} for changes", config_file.display()));
        Some(watcher)
    } else {
        None
    };

    loop {
        tokio::select! {
            signal = signals.recv() => {
                debug!("Received signal {:?}", signal);
                break;
            }
            Some(()) = next_change(&mut watcher) => {
                if let Some(updated) = reload(&server, &current, config_file).await {
                    current = updated;
                }
            }
        }
    }

    console.info("Shutting down");
    let stats = server.shutdown().await;
    event_log.abort();

    if !stats.is_clean() {
        bail!(
            "{} backend(s) and {} socket(s) still tracked after shutdown",
            stats.live_processes,
            stats.live_sockets
        );
    }
    console.success(&format!(
        "Stopped; {} backend(s) started and released",
        stats.processes_released
    ));
    Ok(())
}

async fn next_change(watcher: &mut Option<ConfigWatcher>) -> Option<()> {
    match watcher {
        Some(watcher) => watcher.changed().await,
        None => std::future::pending().await,
    }
}

/// Apply a changed config file to the running proxy
///
/// Returns the configuration now in effect if the file was loaded; an
/// unreadable file leaves everything as it was. Servers that failed to come
/// up are left out so the next reload tries them again.
async fn reload(
    server: &ProxyServer,
    current: &ProxyConfig,
    config_file: &Path,
) -> Option<ProxyConfig> {
    let updated = match load_from_file(config_file) {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring configuration change: {}", e);
            return None;
        }
    };

    if current.backend_executable != updated.backend_executable {
        server.set_backend_executable(&updated.backend_executable);
    }
    for setting in watcher::restart_required(current, &updated) {
        warn!("Change to '{}' takes effect after a restart", setting);
    }

    for change in watcher::diff_servers(&current.servers, &updated.servers) {
        let result = match &change {
            PortChange::Deactivate(port) => server.deactivate(*port).await.map(|_| None),
            PortChange::Activate(config) => {
                server.activate(config.port, &config.image).await.map(Some)
            }
            PortChange::Reconfigure(config) => {
                if server.is_active(config.port).await {
                    server.reconfigure(config.port, &config.image).await.map(Some)
                } else {
                    server.activate(config.port, &config.image).await.map(Some)
                }
            }
        };
        match result {
            Ok(_) => info!("Applied {:?}", change),
            Err(e) => warn!("Failed to apply {:?}: {}", change, e),
        }
    }

    Some(served(server, updated).await)
}

/// `config` with its server list narrowed to the ports actually being served
async fn served(server: &ProxyServer, mut config: ProxyConfig) -> ProxyConfig {
    let active = server.ports().await;
    config.servers.retain(|s| active.contains(&s.port));
    config
}

fn spawn_event_log(mut events: broadcast::Receiver<ProxyEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Event log skipped {} event(s)", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &ProxyEvent) {
    match event {
        ProxyEvent::ListenerStarted {
            port,
            address,
            image,
        } => info!("Server started on port {} ({}) for {}", port, address, image.display()),
        ProxyEvent::ListenerStopped {
            port,
            sessions_closed,
        } => info!("Server on port {} stopped, {} session(s) closed", port, sessions_closed),
        ProxyEvent::ClientConnected {
            port,
            session_id,
            peer,
        } => info!("[{}] gdb connected from {} on port {}", session_id, peer, port),
        ProxyEvent::BackendStarted {
            session_id, pid, ..
        } => info!("[{}] blastem started (pid {:?})", session_id, pid),
        ProxyEvent::SpawnFailed {
            session_id,
            message,
            ..
        } => error!("[{}] blastem failed to start: {}", session_id, message),
        ProxyEvent::BackendConnected {
            session_id,
            address,
            attempts,
            ..
        } => info!(
            "[{}] connected to blastem at {} after {} attempt(s)",
            session_id, address, attempts
        ),
        ProxyEvent::SecondaryConnectFailed {
            session_id,
            message,
            ..
        } => error!("[{}] could not reach blastem: {}", session_id, message),
        ProxyEvent::BackendTerminated {
            session_id,
            exit_code,
            ..
        } => error!("[{}] blastem terminated unexpectedly ({:?})", session_id, exit_code),
        ProxyEvent::ClientDetached { session_id, .. } => {
            info!("[{}] gdb detached", session_id)
        }
        ProxyEvent::ClientDisconnected { session_id, .. } => {
            info!("[{}] gdb disconnected", session_id)
        }
        ProxyEvent::SessionClosed {
            session_id, reason, ..
        } => info!("[{}] session closed: {}", session_id, reason),
    }
}
