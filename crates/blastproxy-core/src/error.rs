//! Error types for the proxy core
//!
//! Every failure the core can surface is a `ProxyError`. Bind and spawn
//! failures are local to one port or one session; none of them is fatal to
//! the proxy process as a whole.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Errors produced by the listener, session and launcher layers
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// Listening socket could not be bound (port in use, missing privilege)
    #[error("Failed to bind port {port}: {message}")]
    BindFailed { port: u16, message: String },

    /// Backend executable missing or not runnable
    #[error("Failed to spawn backend '{}': {message}", executable.display())]
    SpawnFailed {
        executable: PathBuf,
        message: String,
    },

    /// Backend process exited while a debugger was attached
    #[error("Backend terminated unexpectedly ({})", describe_exit(*exit_code))]
    BackendTerminatedUnexpectedly { exit_code: Option<i32> },

    /// Debugger side went away; triggers backend teardown
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Loopback connection to the backend debug port never came up
    #[error("Failed to connect to backend at {address} after {attempts} attempt(s): {message}")]
    SecondaryConnectFailed {
        address: SocketAddr,
        attempts: u32,
        message: String,
    },

    /// Operation on a port that has no active listener
    #[error("No active listener on port {0}")]
    PortNotActive(u16),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        context: Option<String>,
    },

    /// Transport level I/O failure
    #[error("IO error: {message}")]
    Io { message: String },
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "killed by signal".to_string(),
    }
}

impl ProxyError {
    /// Create a bind error
    pub fn bind_failed(port: u16, message: impl Into<String>) -> Self {
        Self::BindFailed {
            port,
            message: message.into(),
        }
    }

    /// Create a spawn error
    pub fn spawn_failed(executable: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            executable: executable.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            context: None,
        }
    }

    /// Create a configuration error with context
    pub fn config_with_context(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Stable code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BindFailed { .. } => "PROXY_BIND_FAILED",
            Self::SpawnFailed { .. } => "PROXY_SPAWN_FAILED",
            Self::BackendTerminatedUnexpectedly { .. } => "PROXY_BACKEND_TERMINATED",
            Self::ClientDisconnected => "PROXY_CLIENT_DISCONNECTED",
            Self::SecondaryConnectFailed { .. } => "PROXY_SECONDARY_CONNECT_FAILED",
            Self::PortNotActive(_) => "PROXY_PORT_NOT_ACTIVE",
            Self::Config { .. } => "PROXY_CONFIG",
            Self::Io { .. } => "PROXY_IO",
        }
    }

    /// Optional context attached to the error
    pub fn context(&self) -> Option<&str> {
        match self {
            Self::Config { context, .. } => context.as_deref(),
            _ => None,
        }
    }

    /// Whether retrying the same operation later can succeed
    ///
    /// A busy port may be freed and a loopback port may come up late; a
    /// missing executable or a crashed backend needs user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BindFailed { .. } | Self::SecondaryConnectFailed { .. } | Self::Io { .. }
        )
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(format!("Invalid JSON: {}", err))
    }
}
