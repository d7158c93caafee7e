//! Backend launcher
//!
//! Starts the emulator for one session and hands the session a byte channel
//! to it. Which channel that is (the process's own stdin/stdout, or a
//! loopback socket to the emulator's debug port) is decided once, when the
//! proxy is built, by picking a `BackendTransport` implementation.

mod process;
mod transport;

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

pub use process::{BackendExit, BackendProcess};
pub use transport::{
    BackendChannel, BackendTransport, ChannelKind, LoopbackTransport, ProcessIoTransport,
    transport_for,
};

/// Flag that starts BlastEm with its GDB remote stub enabled
pub const DEBUG_FLAG: &str = "-D";

/// Emulator executable shared by every listener, read each time a backend starts
pub type SharedExecutable = Arc<RwLock<PathBuf>>;

/// Executable plus the image it is launched with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    /// Emulator executable; may be empty, which fails at spawn time
    pub executable: PathBuf,
    /// ROM image passed as the first argument
    pub image: PathBuf,
}

impl BackendTarget {
    /// Create a new target
    pub fn new(executable: impl Into<PathBuf>, image: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            image: image.into(),
        }
    }

    /// Invocation arguments: `[image, "-D"]`
    pub fn args(&self) -> Vec<OsString> {
        vec![self.image.clone().into_os_string(), OsString::from(DEBUG_FLAG)]
    }

    /// Whether an executable has been configured at all
    pub fn has_executable(&self) -> bool {
        !self.executable.as_os_str().is_empty()
    }
}
