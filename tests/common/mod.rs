//! Shared utilities for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use seeks_proxy::{ActiveConfig, PluginRegistry, ProxyConfig, ProxyServer, Shutdown};

/// Proxy configuration listening on `addr` with short timeouts.
pub fn proxy_config(addr: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = addr.to_string();
    config.timeouts.socket_timeout_secs = 5;
    config.timeouts.connect_timeout_secs = 2;
    config
}

/// Bind and run a proxy. Trigger the returned handle to stop it.
pub async fn start_proxy(config: ProxyConfig) -> Shutdown {
    start_proxy_with_plugins(config, PluginRegistry::new()).await
}

pub async fn start_proxy_with_plugins(config: ProxyConfig, plugins: PluginRegistry) -> Shutdown {
    let shutdown = Shutdown::new();
    let active = ActiveConfig::compile(config).unwrap();
    let server = ProxyServer::bind(active, plugins, shutdown.clone()).await.unwrap();
    tokio::spawn(server.run());
    shutdown
}

/// Read one request head (up to the blank line) from `socket`.
pub async fn read_head(socket: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => return None,
        }
    }
    Some(String::from_utf8_lossy(&head).into_owned())
}

/// Upstream that answers every connection with one fixed response and
/// closes. Each received request head is sent on the returned channel.
pub async fn start_mock_upstream(addr: SocketAddr, response: &'static [u8]) -> mpsc::UnboundedReceiver<String> {
    let listener = TcpListener::bind(addr).await.unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(head) = read_head(&mut socket).await {
                    let _ = tx.send(head);
                    let _ = socket.write_all(response).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    rx
}

/// Upstream that keeps connections open and answers every request on
/// them. Returns the number of accepted connections.
pub async fn start_keep_alive_upstream(addr: SocketAddr, response: &'static [u8]) -> Arc<AtomicUsize> {
    start_keep_alive_upstream_in_pieces(addr, vec![response]).await
}

/// Like [`start_keep_alive_upstream`], but each response goes out as
/// separate writes with a pause in between.
pub async fn start_keep_alive_upstream_in_pieces(addr: SocketAddr, pieces: Vec<&'static [u8]>) -> Arc<AtomicUsize> {
    let listener = TcpListener::bind(addr).await.unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let pieces = pieces.clone();
            tokio::spawn(async move {
                'requests: while read_head(&mut socket).await.is_some() {
                    for (i, piece) in pieces.iter().enumerate() {
                        if i > 0 {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                        if socket.write_all(piece).await.is_err() {
                            break 'requests;
                        }
                    }
                }
            });
        }
    });
    accepted
}

/// Server that echoes everything back.
pub async fn start_echo_server(addr: SocketAddr) {
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
}

/// What a mock SOCKS5 gateway saw on one connection.
#[derive(Debug)]
pub struct SocksExchange {
    pub greeting: Vec<u8>,
    pub connect_request: Vec<u8>,
    pub http_head: String,
}

/// SOCKS5 gateway that grants every CONNECT, then plays the destination
/// server and answers with `response`.
pub async fn start_socks5_gateway(addr: SocketAddr, response: &'static [u8]) -> mpsc::UnboundedReceiver<SocksExchange> {
    let listener = TcpListener::bind(addr).await.unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut greeting = vec![0u8; 3];
                socket.read_exact(&mut greeting).await.unwrap();
                socket.write_all(&[5, 0]).await.unwrap();

                let mut connect_request = vec![0u8; 5];
                socket.read_exact(&mut connect_request).await.unwrap();
                let mut rest = vec![0u8; usize::from(connect_request[4]) + 2];
                socket.read_exact(&mut rest).await.unwrap();
                connect_request.extend_from_slice(&rest);
                socket.write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0, 80]).await.unwrap();

                let http_head = read_head(&mut socket).await.unwrap_or_default();
                let _ = tx.send(SocksExchange {
                    greeting,
                    connect_request,
                    http_head,
                });
                let _ = socket.write_all(response).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    rx
}

/// Send `request` to the proxy and collect everything until it closes.
pub async fn send_raw(proxy: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request).await.unwrap();
    read_to_close(&mut stream).await
}

pub async fn read_to_close(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut out)).await;
    assert!(read.is_ok(), "proxy did not close the connection");
    String::from_utf8_lossy(&out).into_owned()
}

/// Body of a raw HTTP response.
pub fn body_of(response: &str) -> &str {
    response.split_once("\r\n\r\n").map_or("", |(_, body)| body)
}

/// Value of the first header called `name` in a raw HTTP response.
pub fn header_of<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    let head = response.split_once("\r\n\r\n").map_or(response, |(head, _)| head);
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.eq_ignore_ascii_case(name).then(|| value.trim())
    })
}
