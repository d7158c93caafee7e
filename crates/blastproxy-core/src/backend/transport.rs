//! Backend transports
//!
//! A transport turns a started backend process into a `BackendChannel`, the
//! byte-level duplex the relay works on. Two variants exist:
//!
//! - **Process I/O**: the channel is the process's stdin/stdout.
//! - **Loopback**: the emulator listens on a fixed local debug port once it
//!   has started; the channel is a TCP connection to that port.
//!
//! The variant is picked once from `TransportMode` when the proxy is built.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::process::BackendProcess;
use crate::config::{RelayConfig, TransportMode};
use crate::error::{ProxyError, ProxyResult};
use crate::ledger::{LedgerEntry, ResourceKind, SharedLedger};

/// Read half of a backend channel
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of a backend channel
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Which transport a channel runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Backend stdin/stdout
    ProcessIo,
    /// Loopback TCP connection
    Loopback {
        address: SocketAddr,
        attempts: u32,
    },
}

/// Byte channel to a backend, independent of the underlying transport
pub struct BackendChannel {
    reader: BoxedReader,
    writer: BoxedWriter,
    kind: ChannelKind,
    entry: Option<LedgerEntry>,
}

impl BackendChannel {
    fn new(reader: BoxedReader, writer: BoxedWriter, kind: ChannelKind) -> Self {
        Self {
            reader,
            writer,
            kind,
            entry: None,
        }
    }

    /// Transport this channel runs over
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Borrow both halves at once so each direction can be driven separately
    pub fn halves(&mut self) -> (&mut BoxedReader, &mut BoxedWriter) {
        (&mut self.reader, &mut self.writer)
    }

    /// Shut the write side down and release the ledger entry, if any
    pub async fn close(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("Backend channel shutdown: {}", e);
        }
        if let Some(entry) = self.entry.take() {
            entry.release();
        }
    }
}

impl fmt::Debug for BackendChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendChannel")
            .field("kind", &self.kind)
            .finish()
    }
}

/// Produces the relay channel for a freshly started backend
#[async_trait]
pub trait BackendTransport: Send + Sync + fmt::Debug {
    /// Transport mode this implementation serves
    fn mode(&self) -> TransportMode;

    /// Open the channel to `process`
    ///
    /// Must give up if the process exits before the channel is up.
    async fn open(
        &self,
        process: &mut BackendProcess,
        ledger: &SharedLedger,
    ) -> ProxyResult<BackendChannel>;
}

/// Relay over the backend's own stdin/stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessIoTransport;

#[async_trait]
impl BackendTransport for ProcessIoTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::ProcessIo
    }

    async fn open(
        &self,
        process: &mut BackendProcess,
        _ledger: &SharedLedger,
    ) -> ProxyResult<BackendChannel> {
        let (stdin, stdout) = process
            .take_stdio()
            .ok_or_else(|| ProxyError::io("backend stdio handles already taken"))?;

        Ok(BackendChannel::new(
            Box::new(stdout),
            Box::new(stdin),
            ChannelKind::ProcessIo,
        ))
    }
}

/// Relay over a loopback connection to the backend debug port
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    address: SocketAddr,
    attempts: u32,
    retry_delay: Duration,
}

impl LoopbackTransport {
    /// Create a loopback transport
    pub fn new(address: SocketAddr, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            address,
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    /// Address of the backend debug port
    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

#[async_trait]
impl BackendTransport for LoopbackTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Loopback {
            address: self.address,
        }
    }

    async fn open(
        &self,
        process: &mut BackendProcess,
        ledger: &SharedLedger,
    ) -> ProxyResult<BackendChannel> {
        // stdout is not the debug channel here, keep it drained
        process.drain_stdout();

        let mut last_error = String::from("no attempt made");
        for attempt in 1..=self.attempts {
            tokio::select! {
                result = TcpStream::connect(self.address) => match result {
                    Ok(stream) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Failed to set TCP_NODELAY on backend socket: {}", e);
                        }
                        info!(
                            "Connected to backend at {} after {} attempt(s)",
                            self.address, attempt
                        );
                        let entry = ledger.track(
                            ResourceKind::BackendSocket,
                            format!("backend {}", self.address),
                        );
                        let (reader, writer) = stream.into_split();
                        let mut channel = BackendChannel::new(
                            Box::new(reader),
                            Box::new(writer),
                            ChannelKind::Loopback {
                                address: self.address,
                                attempts: attempt,
                            },
                        );
                        channel.entry = Some(entry);
                        return Ok(channel);
                    }
                    Err(e) => {
                        debug!(
                            "Backend connect attempt {}/{} to {} failed: {}",
                            attempt, self.attempts, self.address, e
                        );
                        last_error = e.to_string();
                    }
                },
                exit = process.wait() => {
                    return Err(ProxyError::BackendTerminatedUnexpectedly { exit_code: exit.code });
                }
            }

            if attempt < self.attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_delay) => {}
                    exit = process.wait() => {
                        return Err(ProxyError::BackendTerminatedUnexpectedly { exit_code: exit.code });
                    }
                }
            }
        }

        warn!(
            "Giving up on backend at {} after {} attempt(s)",
            self.address, self.attempts
        );
        Err(ProxyError::SecondaryConnectFailed {
            address: self.address,
            attempts: self.attempts,
            message: last_error,
        })
    }
}

/// Build the transport for a configured mode
pub fn transport_for(mode: TransportMode, relay: &RelayConfig) -> Arc<dyn BackendTransport> {
    match mode {
        TransportMode::ProcessIo => Arc::new(ProcessIoTransport),
        TransportMode::Loopback { address } => Arc::new(LoopbackTransport::new(
            address,
            relay.loopback_connect_attempts,
            relay.loopback_retry_delay(),
        )),
    }
}
