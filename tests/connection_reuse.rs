//! Client keep-alive and upstream connection sharing.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

const KEEP_ALIVE_OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nKeep-Alive: timeout=5\r\n\r\nok";

/// Read one response whose body is `ok`, leaving the connection open.
async fn read_ok_response(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let mut buf = [0u8; 512];
    while !out.ends_with(b"\r\n\r\nok") {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("response timed out")
            .unwrap();
        assert!(n > 0, "proxy closed early: {}", String::from_utf8_lossy(&out));
        out.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[tokio::test]
async fn test_kept_alive_client_reuses_server_socket() {
    let upstream_addr: SocketAddr = "127.0.0.1:28601".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28602".parse().unwrap();

    let accepted = common::start_keep_alive_upstream(upstream_addr, KEEP_ALIVE_OK).await;
    let shutdown = common::start_proxy(common::proxy_config(proxy_addr)).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    for path in ["/first", "/second"] {
        let request = format!("GET http://127.0.0.1:28601{path} HTTP/1.1\r\nHost: 127.0.0.1:28601\r\n\r\n");
        client.write_all(request.as_bytes()).await.unwrap();
        let response = read_ok_response(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    shutdown.trigger();
}

#[tokio::test]
async fn test_pool_shares_server_socket_between_clients() {
    let upstream_addr: SocketAddr = "127.0.0.1:28611".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28612".parse().unwrap();

    let accepted = common::start_keep_alive_upstream(upstream_addr, KEEP_ALIVE_OK).await;
    let shutdown = common::start_proxy(common::proxy_config(proxy_addr)).await;

    for _ in 0..2 {
        let response = common::send_raw(
            proxy_addr,
            b"GET http://127.0.0.1:28611/ HTTP/1.1\r\nHost: 127.0.0.1:28611\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(common::body_of(&response), "ok");
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    shutdown.trigger();
}

#[tokio::test]
async fn test_sharing_disabled_opens_new_sockets() {
    let upstream_addr: SocketAddr = "127.0.0.1:28621".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28622".parse().unwrap();

    let accepted = common::start_keep_alive_upstream(upstream_addr, KEEP_ALIVE_OK).await;
    let mut config = common::proxy_config(proxy_addr);
    config.features.connection_sharing = false;
    let shutdown = common::start_proxy(config).await;

    for _ in 0..2 {
        let response = common::send_raw(
            proxy_addr,
            b"GET http://127.0.0.1:28621/ HTTP/1.1\r\nHost: 127.0.0.1:28621\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(common::body_of(&response), "ok");
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    shutdown.trigger();
}

#[tokio::test]
async fn test_connection_limit_refuses_extra_clients() {
    let proxy_addr: SocketAddr = "127.0.0.1:28632".parse().unwrap();
    let mut config = common::proxy_config(proxy_addr);
    config.listener.max_client_connections = 1;
    let shutdown = common::start_proxy(config).await;

    let _idle = TcpStream::connect(proxy_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = common::send_raw(proxy_addr, b"").await;
    assert!(response.starts_with("HTTP/1.0 503 Too many open connections"), "got: {response}");

    shutdown.trigger();
}
