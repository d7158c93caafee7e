//! Integration tests for activate, deactivate and reconfigure
#![cfg(unix)]

mod common;

use blastproxy_core::{PortConfig, ProxyError, ProxyEvent, ProxyServer, TransportMode};
use common::*;
use tempfile::TempDir;
use tokio::net::TcpStream;

#[tokio::test]
async fn test_deactivate_tears_down_before_returning() {
    let dir = TempDir::new().unwrap();
    let server =
        ProxyServer::new(&proxy_config(echo_backend(&dir), TransportMode::ProcessIo)).unwrap();
    let mut events = server.subscribe();
    let port = free_port();
    server.activate(port, "sonic.bin").await.unwrap();

    let mut client = connect(port).await;
    round_trip(&mut client, b"$g#67").await;

    server.deactivate(port).await.unwrap();
    assert!(server.ledger().stats().is_clean());
    assert!(!server.is_active(port).await);

    let stopped = expect_event(&mut events, |e| {
        matches!(e, ProxyEvent::ListenerStopped { .. })
    })
    .await;
    assert_eq!(
        stopped,
        ProxyEvent::ListenerStopped {
            port,
            sessions_closed: 1
        }
    );

    assert!(wait_closed(&mut client).await);
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    assert_eq!(
        server.deactivate(port).await.unwrap_err(),
        ProxyError::PortNotActive(port)
    );
}

#[tokio::test]
async fn test_reconfigure_replaces_image() {
    let dir = TempDir::new().unwrap();
    let server =
        ProxyServer::new(&proxy_config(echo_backend(&dir), TransportMode::ProcessIo)).unwrap();
    let port = free_port();
    server.activate(port, "sonic.bin").await.unwrap();

    let mut old = connect(port).await;
    round_trip(&mut old, b"$g#67").await;
    assert_eq!(recorded_args(&dir).await, "sonic.bin -D");
    std::fs::remove_file(dir.path().join("args.txt")).unwrap();

    server.reconfigure(port, "streets.bin").await.unwrap();

    // Old session gone before the new listener takes connections
    let stats = server.ledger().stats();
    assert!(stats.is_clean());
    assert_eq!(stats.processes_released, 1);
    assert!(wait_closed(&mut old).await);

    assert_eq!(
        server.image(port).await.as_deref(),
        Some(std::path::Path::new("streets.bin"))
    );
    let mut new = connect(port).await;
    assert_eq!(round_trip(&mut new, b"$g#67").await, b"$g#67");
    assert_eq!(recorded_args(&dir).await, "streets.bin -D");

    server.shutdown().await;
}

#[tokio::test]
async fn test_backend_change_applies_to_next_session() {
    let first_dir = TempDir::new().unwrap();
    let second_dir = TempDir::new().unwrap();
    let server = ProxyServer::new(&proxy_config(
        echo_backend(&first_dir),
        TransportMode::ProcessIo,
    ))
    .unwrap();
    let port = free_port();
    server.activate(port, "sonic.bin").await.unwrap();

    let mut running = connect(port).await;
    round_trip(&mut running, b"$g#67").await;
    assert_eq!(recorded_args(&first_dir).await, "sonic.bin -D");

    let replacement = echo_backend(&second_dir);
    server.set_backend_executable(&replacement);
    assert_eq!(server.backend_executable(), replacement);

    // No restart or reactivation; the next debugger gets the new backend
    let mut next = connect(port).await;
    assert_eq!(round_trip(&mut next, b"$?#3f").await, b"$?#3f");
    assert_eq!(recorded_args(&second_dir).await, "sonic.bin -D");

    // The session already running keeps its backend
    assert_eq!(round_trip(&mut running, b"$s#73").await, b"$s#73");
    assert_eq!(server.ledger().stats().live_processes, 2);

    let stats = server.shutdown().await;
    assert!(stats.is_clean());
}

#[tokio::test]
async fn test_move_port() {
    let dir = TempDir::new().unwrap();
    let server =
        ProxyServer::new(&proxy_config(echo_backend(&dir), TransportMode::ProcessIo)).unwrap();
    let old_port = free_port();
    let new_port = free_port();
    server.activate(old_port, "sonic.bin").await.unwrap();

    server.move_port(old_port, new_port, "sonic.bin").await.unwrap();
    assert_eq!(server.ports().await, vec![new_port]);

    let mut client = connect(new_port).await;
    assert_eq!(round_trip(&mut client, b"$g#67").await, b"$g#67");
    server.shutdown().await;
}

#[tokio::test]
async fn test_start_skips_ports_that_fail_to_bind() {
    let dir = TempDir::new().unwrap();
    let server =
        ProxyServer::new(&proxy_config(echo_backend(&dir), TransportMode::ProcessIo)).unwrap();

    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let busy = taken.local_addr().unwrap().port();
    let free = free_port();

    let results = server
        .start(&[
            PortConfig::new(busy, "sonic.bin"),
            PortConfig::new(free, "streets.bin"),
        ])
        .await;

    assert_eq!(results.len(), 2);
    assert!(matches!(results[0], (p, Err(ProxyError::BindFailed { .. })) if p == busy));
    assert!(results[1].1.is_ok());
    assert_eq!(server.ports().await, vec![free]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_reports_clean_ledger() {
    let dir = TempDir::new().unwrap();
    let server =
        ProxyServer::new(&proxy_config(echo_backend(&dir), TransportMode::ProcessIo)).unwrap();
    let ports = [free_port(), free_port()];
    for port in ports {
        server.activate(port, "sonic.bin").await.unwrap();
    }

    let mut clients = Vec::new();
    for port in ports {
        let mut client = connect(port).await;
        round_trip(&mut client, b"$g#67").await;
        clients.push(client);
    }
    assert_eq!(server.ledger().stats().live_processes, 2);

    let stats = server.shutdown().await;
    assert!(stats.is_clean());
    assert_eq!(stats.processes_released, 2);
    assert_eq!(stats.sockets_released, 2);
    assert!(server.ports().await.is_empty());
}
