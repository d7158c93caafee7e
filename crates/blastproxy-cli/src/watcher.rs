//! Configuration hot reload via file system watching
//!
//! Watches the directory holding the config file (editors often replace the
//! file instead of writing it in place) and reports changes to that one file.
//! `diff_servers` turns two server lists into the port operations that take
//! the running proxy from one to the other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use blastproxy_core::{PortConfig, ProxyConfig};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, Debouncer, new_debouncer};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Debounce window for config file events
pub const DEBOUNCE: Duration = Duration::from_millis(300);

/// Config file watcher
pub struct ConfigWatcher {
    #[allow(dead_code)]
    debouncer: Debouncer<RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<()>,
}

impl ConfigWatcher {
    /// Start watching `config_path`
    pub fn new(config_path: &Path, debounce: Duration) -> Result<Self> {
        let config_path = absolute(config_path)?;
        let dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .context("config path has no parent directory")?;
        let file_name = config_path
            .file_name()
            .map(|n| n.to_os_string())
            .context("config path has no file name")?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(
            debounce,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    let touched = events.iter().any(|event| {
                        matches!(event.kind, DebouncedEventKind::Any)
                            && event.path.file_name() == Some(file_name.as_os_str())
                    });
                    if touched && event_tx.send(()).is_err() {
                        debug!("Config watcher receiver dropped");
                    }
                }
                Err(e) => error!("File watcher error: {}", e),
            },
        )
        .context("failed to create file watcher")?;

        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", dir.display()))?;
        debug!("Watching {} for configuration changes", config_path.display());

        Ok(Self {
            debouncer,
            event_rx,
        })
    }

    /// Wait for the next change to the config file
    pub async fn changed(&mut self) -> Option<()> {
        self.event_rx.recv().await
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("failed to resolve working directory")?
            .join(path))
    }
}

/// One operation on the running proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortChange {
    /// Port newly configured
    Activate(PortConfig),
    /// Port no longer configured
    Deactivate(u16),
    /// Port still configured with a different image
    Reconfigure(PortConfig),
}

/// Port operations turning `old` into `new`; deactivations come first
pub fn diff_servers(old: &[PortConfig], new: &[PortConfig]) -> Vec<PortChange> {
    let before: HashMap<u16, &PortConfig> = old.iter().map(|s| (s.port, s)).collect();
    let after: HashMap<u16, &PortConfig> = new.iter().map(|s| (s.port, s)).collect();

    let mut changes: Vec<PortChange> = old
        .iter()
        .filter(|s| !after.contains_key(&s.port))
        .map(|s| PortChange::Deactivate(s.port))
        .collect();

    for server in new {
        match before.get(&server.port) {
            None => changes.push(PortChange::Activate(server.clone())),
            Some(previous) if previous.image != server.image => {
                changes.push(PortChange::Reconfigure(server.clone()))
            }
            Some(_) => {}
        }
    }
    changes
}

/// Settings that only take effect after a restart, if any changed
pub fn restart_required(old: &ProxyConfig, new: &ProxyConfig) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if old.bind_address != new.bind_address {
        changed.push("bind_address");
    }
    if old.transport != new.transport {
        changed.push("transport");
    }
    if old.relay != new.relay {
        changed.push("relay");
    }
    if old.logging != new.logging {
        changed.push("logging");
    }
    changed
}
