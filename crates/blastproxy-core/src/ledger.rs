//! Liveness ledger for backend processes and sockets
//!
//! Every backend process and every socket a session opens is recorded here
//! when it is created and removed when the session tears it down. An entry is
//! a move-only token: `release` consumes it, so a resource cannot be released
//! twice. A token dropped without `release` still removes itself and logs a
//! warning, so nothing stays tracked forever.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

/// Identity of a tracked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a ledger entry stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Spawned backend process
    Process,
    /// Accepted debugger connection
    ClientSocket,
    /// Loopback connection to the backend debug port
    BackendSocket,
}

impl ResourceKind {
    fn is_process(self) -> bool {
        matches!(self, Self::Process)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process => write!(f, "backend process"),
            Self::ClientSocket => write!(f, "client socket"),
            Self::BackendSocket => write!(f, "backend socket"),
        }
    }
}

/// Counters describing ledger activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    /// Processes currently tracked
    pub live_processes: usize,
    /// Sockets (client and backend) currently tracked
    pub live_sockets: usize,
    /// Processes ever tracked
    pub processes_tracked: u64,
    /// Sockets ever tracked
    pub sockets_tracked: u64,
    /// Processes released
    pub processes_released: u64,
    /// Sockets released
    pub sockets_released: u64,
}

impl LedgerStats {
    /// No process or socket is tracked
    pub fn is_clean(&self) -> bool {
        self.live_processes == 0 && self.live_sockets == 0
    }
}

#[derive(Debug, Default)]
struct LedgerInner {
    processes: HashMap<ResourceId, String>,
    sockets: HashMap<ResourceId, (ResourceKind, String)>,
    stats: LedgerStats,
}

/// Registry of live processes and sockets, shared by every session
#[derive(Debug, Default)]
pub struct Ledger {
    inner: Mutex<LedgerInner>,
    next_id: AtomicU64,
}

/// Shared handle to the ledger
pub type SharedLedger = Arc<Ledger>;

impl Ledger {
    /// Create an empty shared ledger
    pub fn new() -> SharedLedger {
        Arc::new(Self::default())
    }

    /// Record a newly created resource
    pub fn track(self: &Arc<Self>, kind: ResourceKind, label: impl Into<String>) -> LedgerEntry {
        let id = ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let label = label.into();

        {
            let mut inner = self.inner.lock();
            if kind.is_process() {
                inner.processes.insert(id, label.clone());
                inner.stats.processes_tracked += 1;
            } else {
                inner.sockets.insert(id, (kind, label.clone()));
                inner.stats.sockets_tracked += 1;
            }
        }

        debug!("Tracking {} {} ({})", kind, id, label);

        LedgerEntry {
            ledger: Arc::clone(self),
            id,
            kind,
            released: false,
        }
    }

    fn remove(&self, id: ResourceId, kind: ResourceKind) {
        let removed = {
            let mut inner = self.inner.lock();
            if kind.is_process() {
                let removed = inner.processes.remove(&id);
                if removed.is_some() {
                    inner.stats.processes_released += 1;
                }
                removed
            } else {
                let removed = inner.sockets.remove(&id).map(|(_, label)| label);
                if removed.is_some() {
                    inner.stats.sockets_released += 1;
                }
                removed
            }
        };

        match removed {
            Some(label) => debug!("Released {} {} ({})", kind, id, label),
            None => error!("{} {} released but was not tracked", kind, id),
        }
    }

    /// Whether a resource is currently tracked
    pub fn contains(&self, id: ResourceId) -> bool {
        let inner = self.inner.lock();
        inner.processes.contains_key(&id) || inner.sockets.contains_key(&id)
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> LedgerStats {
        let inner = self.inner.lock();
        LedgerStats {
            live_processes: inner.processes.len(),
            live_sockets: inner.sockets.len(),
            ..inner.stats
        }
    }

    /// Labels of everything still tracked, for leak reports
    pub fn live_labels(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut labels: Vec<String> = inner
            .processes
            .values()
            .cloned()
            .chain(inner.sockets.values().map(|(_, label)| label.clone()))
            .collect();
        labels.sort();
        labels
    }
}

/// Proof that a resource is tracked; consumed on release
#[must_use = "a ledger entry must be released when its resource is torn down"]
#[derive(Debug)]
pub struct LedgerEntry {
    ledger: SharedLedger,
    id: ResourceId,
    kind: ResourceKind,
    released: bool,
}

impl LedgerEntry {
    /// Identity of the tracked resource
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Kind of the tracked resource
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Remove the resource from the ledger
    pub fn release(mut self) {
        self.released = true;
        self.ledger.remove(self.id, self.kind);
    }
}

impl Drop for LedgerEntry {
    fn drop(&mut self) {
        if !self.released {
            warn!("{} {} dropped without explicit release", self.kind, self.id);
            self.ledger.remove(self.id, self.kind);
        }
    }
}
