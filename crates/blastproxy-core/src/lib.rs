//! BlastProxy Core Library
//!
//! This crate provides the proxy engine that sits between GDB and BlastEm:
//! per-port listeners, per-connection sessions with their own backend
//! process, the byte relay with detach detection, and the liveness ledger.

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod registry;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use backend::{
    BackendExit, BackendProcess, BackendTarget, BackendTransport, SharedExecutable, transport_for,
};
pub use config::{LoggingConfig, PortConfig, ProxyConfig, RelayConfig, TransportMode};
pub use error::{ProxyError, ProxyResult};
pub use events::{EventBus, ProxyEvent, SharedEventBus};
pub use ledger::{Ledger, LedgerEntry, LedgerStats, ResourceKind, SharedLedger};
pub use registry::PortRegistry;
pub use server::ProxyServer;
pub use session::{CloseReason, DETACH_PACKET, Session, SessionId, SessionState};
