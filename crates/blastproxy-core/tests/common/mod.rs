//! Shared helpers for proxy integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use blastproxy_core::{LedgerStats, ProxyConfig, ProxyEvent, SharedLedger, TransportMode};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

/// Write an executable shell script into `dir`
pub fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Backend that records its arguments to `args.txt` and echoes stdin,
/// keeping a copy of everything it received in `received.txt`
pub fn echo_backend(dir: &TempDir) -> PathBuf {
    let args = dir.path().join("args.txt");
    let received = dir.path().join("received.txt");
    write_script(
        dir,
        "echo-backend.sh",
        &format!(
            "echo \"$@\" > '{}'\nexec tee '{}'\n",
            args.display(),
            received.display()
        ),
    )
}

/// Bytes the echo backend has received so far
pub fn received_bytes(dir: &TempDir) -> Vec<u8> {
    std::fs::read(dir.path().join("received.txt")).unwrap_or_default()
}

/// Arguments the last echo backend was started with
pub async fn recorded_args(dir: &TempDir) -> String {
    let path = dir.path().join("args.txt");
    for _ in 0..100 {
        if let Ok(args) = std::fs::read_to_string(&path) {
            if !args.is_empty() {
                return args.trim().to_string();
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("backend never recorded its arguments");
}

/// Port that was free a moment ago
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn proxy_config(executable: impl AsRef<Path>, transport: TransportMode) -> ProxyConfig {
    ProxyConfig {
        backend_executable: executable.as_ref().to_path_buf(),
        bind_address: "127.0.0.1".parse().unwrap(),
        transport,
        ..Default::default()
    }
}

pub async fn connect(port: u16) -> TcpStream {
    timeout(WAIT, TcpStream::connect(("127.0.0.1", port)))
        .await
        .expect("connect timed out")
        .expect("connect failed")
}

/// Send a packet and read back exactly as many bytes
pub async fn round_trip(client: &mut TcpStream, packet: &[u8]) -> Vec<u8> {
    client.write_all(packet).await.unwrap();
    let mut reply = vec![0u8; packet.len()];
    timeout(WAIT, client.read_exact(&mut reply))
        .await
        .expect("reply timed out")
        .expect("reply failed");
    reply
}

/// Whether the peer closed the connection
pub async fn wait_closed(client: &mut TcpStream) -> bool {
    let mut buf = [0u8; 64];
    loop {
        match timeout(WAIT, client.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => return true,
            Ok(Ok(_)) => continue,
            Err(_) => return false,
        }
    }
}

/// Everything the peer sends until it closes the connection
pub async fn read_until_closed(client: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    timeout(WAIT, client.read_to_end(&mut received))
        .await
        .expect("connection was not closed")
        .expect("read failed");
    received
}

/// Next event matching `matches`
pub async fn expect_event<F>(rx: &mut broadcast::Receiver<ProxyEvent>, mut matches: F) -> ProxyEvent
where
    F: FnMut(&ProxyEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll until nothing is tracked
pub async fn wait_clean(ledger: &SharedLedger) -> LedgerStats {
    for _ in 0..250 {
        let stats = ledger.stats();
        if stats.is_clean() {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("ledger still tracking {:?}", ledger.live_labels());
}

/// Stand-in for the emulator debug port: accepts one connection and echoes it
pub fn echo_emulator(listener: TcpListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        return;
                    }
                }
            }
        }
    })
}

pub fn loopback(address: SocketAddr) -> TransportMode {
    TransportMode::Loopback { address }
}
