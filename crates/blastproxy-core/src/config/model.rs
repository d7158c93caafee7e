//! Configuration data model

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::logging_config::LoggingConfig;
use super::timeouts;
use crate::error::{ProxyError, ProxyResult};

/// One served port and the ROM image its sessions run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// TCP port the debugger connects to
    pub port: u16,
    /// ROM image handed to the backend as its first argument
    pub image: PathBuf,
}

impl PortConfig {
    /// Create a new port entry
    pub fn new(port: u16, image: impl Into<PathBuf>) -> Self {
        Self {
            port,
            image: image.into(),
        }
    }
}

/// How sessions talk to their backend
///
/// Chosen once per deployment. Every session of a proxy uses the same mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// RSP over the backend's stdin/stdout
    ProcessIo,
    /// RSP over a loopback TCP connection opened after the backend starts
    Loopback {
        /// Fixed address of the backend debug port
        address: SocketAddr,
    },
}

impl TransportMode {
    /// Loopback mode against the conventional BlastEm debug port
    pub fn default_loopback() -> Self {
        Self::Loopback {
            address: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                timeouts::loopback::DEBUG_PORT,
            ),
        }
    }

    /// Whether this mode needs the secondary loopback connection
    pub fn is_loopback(&self) -> bool {
        matches!(self, Self::Loopback { .. })
    }
}

impl Default for TransportMode {
    fn default() -> Self {
        if cfg!(target_os = "windows") {
            Self::default_loopback()
        } else {
            Self::ProcessIo
        }
    }
}

/// Relay tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Largest chunk read from one side before it is written to the other
    pub buffer_size: usize,
    /// Connection attempts against the loopback debug port
    pub loopback_connect_attempts: u32,
    /// Delay between loopback connection attempts, in milliseconds
    pub loopback_retry_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: timeouts::relay::BUFFER_SIZE,
            loopback_connect_attempts: timeouts::loopback::CONNECT_ATTEMPTS,
            loopback_retry_delay_ms: timeouts::loopback::RETRY_DELAY_MS,
        }
    }
}

impl RelayConfig {
    /// Loopback retry delay as Duration
    pub fn loopback_retry_delay(&self) -> Duration {
        Duration::from_millis(self.loopback_retry_delay_ms)
    }
}

/// Complete proxy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Path to the emulator executable; empty means unset
    pub backend_executable: PathBuf,
    /// Local address listeners bind to
    pub bind_address: IpAddr,
    /// Backend transport variant
    pub transport: TransportMode,
    /// Served ports, in display order
    pub servers: Vec<PortConfig>,
    /// Relay tuning
    pub relay: RelayConfig,
    /// Logging settings for the front end
    pub logging: LoggingConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            backend_executable: PathBuf::new(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            transport: TransportMode::default(),
            servers: Vec::new(),
            relay: RelayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Look up the entry for a port
    pub fn server(&self, port: u16) -> Option<&PortConfig> {
        self.servers.iter().find(|s| s.port == port)
    }

    /// Check structural invariants
    ///
    /// An empty backend executable is accepted here; it fails at spawn time.
    pub fn validate(&self) -> ProxyResult<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.port == 0 {
                return Err(ProxyError::config_with_context(
                    "port 0 cannot be served",
                    format!("server entry for image '{}'", server.image.display()),
                ));
            }
            if !seen.insert(server.port) {
                return Err(ProxyError::config(format!(
                    "port {} is configured more than once",
                    server.port
                )));
            }
        }

        if self.relay.buffer_size == 0 {
            return Err(ProxyError::config("relay.buffer_size must be greater than 0"));
        }

        if self.relay.loopback_connect_attempts == 0 {
            return Err(ProxyError::config(
                "relay.loopback_connect_attempts must be greater than 0",
            ));
        }

        Ok(())
    }
}
