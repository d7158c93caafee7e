//! Integration tests for sessions over process I/O
#![cfg(unix)]

mod common;

use blastproxy_core::{CloseReason, DETACH_PACKET, ProxyEvent, ProxyServer, TransportMode};
use common::*;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn test_sonic_session_relays_and_detaches() {
    let dir = TempDir::new().unwrap();
    let server =
        ProxyServer::new(&proxy_config(echo_backend(&dir), TransportMode::ProcessIo)).unwrap();
    let mut events = server.subscribe();
    let port = free_port();
    server.activate(port, "sonic.bin").await.unwrap();

    let mut client = connect(port).await;
    let reply = round_trip(&mut client, b"$g#67").await;
    assert_eq!(reply, b"$g#67");
    assert_eq!(recorded_args(&dir).await, "sonic.bin -D");

    let live = server.ledger().stats();
    assert_eq!(live.live_processes, 1);
    assert_eq!(live.live_sockets, 1);
    assert_eq!(server.session_count(port).await, 1);

    client.write_all(DETACH_PACKET).await.unwrap();
    assert!(read_until_closed(&mut client).await.is_empty());

    expect_event(&mut events, |e| matches!(e, ProxyEvent::ClientDetached { .. })).await;
    let closed = expect_event(&mut events, |e| matches!(e, ProxyEvent::SessionClosed { .. })).await;
    assert!(matches!(
        closed,
        ProxyEvent::SessionClosed {
            reason: CloseReason::Detached,
            ..
        }
    ));

    let stats = wait_clean(server.ledger()).await;
    // The detach packet never reached the backend
    assert_eq!(received_bytes(&dir), b"$g#67");
    assert_eq!(stats.processes_tracked, 1);
    assert_eq!(stats.processes_released, 1);
    assert_eq!(stats.sockets_released, 1);
    assert_eq!(server.session_count(port).await, 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_bytes_relay_in_order() {
    let dir = TempDir::new().unwrap();
    let server =
        ProxyServer::new(&proxy_config(echo_backend(&dir), TransportMode::ProcessIo)).unwrap();
    let port = free_port();
    server.activate(port, "sonic.bin").await.unwrap();

    let mut client = connect(port).await;
    let packets: [&[u8]; 4] = [b"+", b"$qSupported#37", b"$m0,100#f6", b"$?#3f"];
    for packet in packets {
        assert_eq!(round_trip(&mut client, packet).await, packet);
    }

    // A detach packet embedded in a larger chunk is ordinary data
    let mixed = b"$c#63$D#44";
    assert_eq!(round_trip(&mut client, mixed).await, mixed);

    drop(client);
    wait_clean(server.ledger()).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_spawn_failure_closes_client() {
    let server = ProxyServer::new(&proxy_config(
        "/nonexistent/blastem",
        TransportMode::ProcessIo,
    ))
    .unwrap();
    let mut events = server.subscribe();
    let port = free_port();
    server.activate(port, "sonic.bin").await.unwrap();

    let mut client = connect(port).await;
    assert!(wait_closed(&mut client).await);

    let event = expect_event(&mut events, |e| matches!(e, ProxyEvent::SpawnFailed { .. })).await;
    assert!(event.is_error());
    assert_eq!(event.port(), port);

    let stats = wait_clean(server.ledger()).await;
    assert_eq!(stats.processes_tracked, 0);
    assert_eq!(stats.sockets_released, 1);

    // The listener survives a failed session
    assert!(server.is_active(port).await);
    server.shutdown().await;
}

#[tokio::test]
async fn test_client_disconnect_kills_backend() {
    let dir = TempDir::new().unwrap();
    let server =
        ProxyServer::new(&proxy_config(echo_backend(&dir), TransportMode::ProcessIo)).unwrap();
    let mut events = server.subscribe();
    let port = free_port();
    server.activate(port, "sonic.bin").await.unwrap();

    let mut client = connect(port).await;
    round_trip(&mut client, b"$g#67").await;
    drop(client);

    expect_event(&mut events, |e| {
        matches!(e, ProxyEvent::ClientDisconnected { .. })
    })
    .await;
    let stats = wait_clean(server.ledger()).await;
    assert_eq!(stats.processes_released, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_backend_crash_ends_only_that_session() {
    let dir = TempDir::new().unwrap();
    let crashing = write_script(&dir, "crash.sh", "read line\nexit 7\n");
    let server = ProxyServer::new(&proxy_config(crashing, TransportMode::ProcessIo)).unwrap();
    let mut events = server.subscribe();
    let port = free_port();
    server.activate(port, "sonic.bin").await.unwrap();

    let mut client = connect(port).await;
    client.write_all(b"$k#6b\n").await.unwrap();

    let event = expect_event(&mut events, |e| {
        matches!(e, ProxyEvent::BackendTerminated { .. })
    })
    .await;
    assert!(matches!(
        event,
        ProxyEvent::BackendTerminated {
            exit_code: Some(7),
            ..
        }
    ));
    assert!(wait_closed(&mut client).await);
    wait_clean(server.ledger()).await;

    // The port keeps accepting
    assert!(server.is_active(port).await);
    let _again = connect(port).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_output_written_before_exit_reaches_client() {
    const REPLY_LEN: usize = 4_000_000;

    let dir = TempDir::new().unwrap();
    let backend = write_script(
        &dir,
        "bulk.sh",
        &format!("read line\nhead -c {} /dev/zero\nexit 0\n", REPLY_LEN),
    );
    let server = ProxyServer::new(&proxy_config(backend, TransportMode::ProcessIo)).unwrap();
    let mut events = server.subscribe();
    let port = free_port();
    server.activate(port, "sonic.bin").await.unwrap();

    let mut client = connect(port).await;
    client.write_all(b"$m0,3d0900#ca\n").await.unwrap();

    // Let the backend finish writing and exit while the client is not reading
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    let received = read_until_closed(&mut client).await;
    assert_eq!(received.len(), REPLY_LEN);
    assert!(received.iter().all(|&b| b == 0));

    let closed = expect_event(&mut events, |e| matches!(e, ProxyEvent::SessionClosed { .. })).await;
    assert!(matches!(
        closed,
        ProxyEvent::SessionClosed {
            reason: CloseReason::BackendExited { exit_code: Some(0) },
            ..
        }
    ));
    wait_clean(server.ledger()).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_ports_are_independent() {
    let dir = TempDir::new().unwrap();
    let server =
        ProxyServer::new(&proxy_config(echo_backend(&dir), TransportMode::ProcessIo)).unwrap();
    let first = free_port();
    let second = free_port();
    server.activate(first, "sonic.bin").await.unwrap();
    server.activate(second, "streets.bin").await.unwrap();
    assert_eq!(server.ports().await.len(), 2);

    let mut a = connect(first).await;
    let mut b = connect(second).await;
    round_trip(&mut a, b"$g#67").await;
    round_trip(&mut b, b"$g#67").await;
    assert_eq!(server.ledger().stats().live_processes, 2);

    a.write_all(DETACH_PACKET).await.unwrap();
    assert!(wait_closed(&mut a).await);

    assert_eq!(round_trip(&mut b, b"$?#3f").await, b"$?#3f");
    assert_eq!(server.session_count(second).await, 1);

    drop(b);
    wait_clean(server.ledger()).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_sessions_on_one_port_are_independent() {
    let dir = TempDir::new().unwrap();
    let server =
        ProxyServer::new(&proxy_config(echo_backend(&dir), TransportMode::ProcessIo)).unwrap();
    let port = free_port();
    server.activate(port, "sonic.bin").await.unwrap();

    let mut a = connect(port).await;
    let mut b = connect(port).await;
    round_trip(&mut a, b"$g#67").await;
    round_trip(&mut b, b"$g#67").await;
    assert_eq!(server.session_count(port).await, 2);

    drop(a);
    assert_eq!(round_trip(&mut b, b"$s#73").await, b"$s#73");

    let stats = server.shutdown().await;
    assert!(stats.is_clean());
    assert_eq!(stats.processes_tracked, 2);
    assert!(wait_closed(&mut b).await);
}
