//! End-to-end relay tests through a running proxy.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use seeks_proxy::config::schema::{ActionRuleConfig, ForwardRuleConfig, TextFilterConfig};
use seeks_proxy::routing::{ActionSettings, ForwardType};

mod common;

const HELLO: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello";

#[tokio::test]
async fn test_plain_get_is_relayed() {
    let upstream_addr: SocketAddr = "127.0.0.1:28401".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28402".parse().unwrap();

    let mut heads = common::start_mock_upstream(upstream_addr, HELLO).await;
    let shutdown = common::start_proxy(common::proxy_config(proxy_addr)).await;

    let response = common::send_raw(
        proxy_addr,
        b"GET http://127.0.0.1:28401/ HTTP/1.1\r\nHost: 127.0.0.1:28401\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got: {response}");
    assert_eq!(common::body_of(&response), "hello");
    assert!(common::header_of(&response, "Connection").is_some());

    let head = heads.recv().await.unwrap();
    assert!(head.starts_with("GET / HTTP/1.1\r\n"), "upstream saw: {head}");
    assert!(head.contains("Host: 127.0.0.1"));

    shutdown.trigger();
}

#[tokio::test]
async fn test_connect_tunnels_raw_bytes() {
    let echo_addr: SocketAddr = "127.0.0.1:28411".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28412".parse().unwrap();

    common::start_echo_server(echo_addr).await;
    let shutdown = common::start_proxy(common::proxy_config(proxy_addr)).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client
        .write_all(b"CONNECT 127.0.0.1:28411 HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let expected = format!(
        "HTTP/1.0 200 Connection established\r\nProxy-Agent: Seeks proxy/{}\r\n\r\n",
        env!("CARGO_PKG_VERSION")
    );
    let mut confirmation = vec![0u8; expected.len()];
    client.read_exact(&mut confirmation).await.unwrap();
    assert_eq!(String::from_utf8_lossy(&confirmation), expected);

    // Not HTTP: the tunnel must not look at it.
    let payload = b"\x16\x03\x01\x00\x05hello";
    client.write_all(payload).await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, payload);

    shutdown.trigger();
}

#[tokio::test]
async fn test_socks5_forwarding() {
    let gateway_addr: SocketAddr = "127.0.0.1:28421".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28422".parse().unwrap();

    let mut exchanges = common::start_socks5_gateway(gateway_addr, HELLO).await;

    let mut config = common::proxy_config(proxy_addr);
    config.forward.push(ForwardRuleConfig {
        pattern: String::new(),
        forward_type: ForwardType::Socks5,
        gateway: Some(gateway_addr.to_string()),
        forward: None,
    });
    let shutdown = common::start_proxy(config).await;

    let response = common::send_raw(
        proxy_addr,
        b"GET http://example.test/ HTTP/1.1\r\nHost: example.test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(common::body_of(&response), "hello");

    let exchange = exchanges.recv().await.unwrap();
    assert_eq!(exchange.greeting, [5, 1, 0]);
    let mut expected = vec![5, 1, 0, 3, 12];
    expected.extend_from_slice(b"example.test");
    expected.extend_from_slice(&[0, 80]);
    assert_eq!(exchange.connect_request, expected);
    assert!(exchange.http_head.starts_with("GET / HTTP/1.1\r\n"));
    assert!(exchange.http_head.contains("Host: example.test"));

    shutdown.trigger();
}

#[tokio::test]
async fn test_chunked_body_is_dechunked_and_filtered() {
    let upstream_addr: SocketAddr = "127.0.0.1:28431".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28432".parse().unwrap();

    common::start_mock_upstream(
        upstream_addr,
        b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
    )
    .await;

    let mut config = common::proxy_config(proxy_addr);
    config.filters.push(TextFilterConfig {
        name: "greeting".into(),
        pattern: "hello".into(),
        replacement: "howdy".into(),
    });
    config.actions.push(ActionRuleConfig {
        pattern: String::new(),
        settings: ActionSettings {
            filter: vec!["greeting".into()],
            ..ActionSettings::default()
        },
    });
    let shutdown = common::start_proxy(config).await;

    let response = common::send_raw(
        proxy_addr,
        b"GET http://127.0.0.1:28431/ HTTP/1.1\r\nHost: 127.0.0.1:28431\r\n\r\n",
    )
    .await;

    assert_eq!(common::body_of(&response), "howdy");
    assert_eq!(common::header_of(&response, "Content-Length"), Some("5"));
    assert_eq!(common::header_of(&response, "Transfer-Encoding"), None);

    shutdown.trigger();
}

#[tokio::test]
async fn test_reqwest_through_proxy() {
    let upstream_addr: SocketAddr = "127.0.0.1:28441".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28442".parse().unwrap();

    let mut heads = common::start_mock_upstream(
        upstream_addr,
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
    )
    .await;
    let shutdown = common::start_proxy(common::proxy_config(proxy_addr)).await;

    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{proxy_addr}")).unwrap())
        .pool_max_idle_per_host(0)
        .build()
        .unwrap();

    let res = client
        .get(format!("http://{upstream_addr}/page?q=1"))
        .send()
        .await
        .expect("Proxy unreachable");
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "ok");

    let head = heads.recv().await.unwrap();
    assert!(head.starts_with("GET /page?q=1 HTTP/1.1\r\n"), "upstream saw: {head}");
    assert!(!head.to_ascii_lowercase().contains("proxy-connection"));

    shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_destination_gets_error_page() {
    let proxy_addr: SocketAddr = "127.0.0.1:28452".parse().unwrap();
    let shutdown = common::start_proxy(common::proxy_config(proxy_addr)).await;

    // Nothing listens on 28451.
    let response = common::send_raw(
        proxy_addr,
        b"GET http://127.0.0.1:28451/ HTTP/1.1\r\nHost: 127.0.0.1:28451\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 503 Connect failed\r\n"), "got: {response}");

    shutdown.trigger();
}

#[tokio::test]
async fn test_server_garbage_is_rejected() {
    let upstream_addr: SocketAddr = "127.0.0.1:28461".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28462".parse().unwrap();

    common::start_mock_upstream(upstream_addr, b"SSH-2.0-OpenSSH_9.0\r\n\r\n").await;
    let shutdown = common::start_proxy(common::proxy_config(proxy_addr)).await;

    let response = common::send_raw(
        proxy_addr,
        b"GET http://127.0.0.1:28461/ HTTP/1.1\r\nHost: 127.0.0.1:28461\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.0 502 Server or forwarder response invalid"), "got: {response}");

    shutdown.trigger();
}

#[tokio::test]
async fn test_empty_server_response() {
    let upstream_addr: SocketAddr = "127.0.0.1:28471".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28472".parse().unwrap();

    common::start_mock_upstream(upstream_addr, b"").await;
    let shutdown = common::start_proxy(common::proxy_config(proxy_addr)).await;

    let response = common::send_raw(
        proxy_addr,
        b"GET http://127.0.0.1:28471/ HTTP/1.1\r\nHost: 127.0.0.1:28471\r\n\r\n",
    )
    .await;
    assert!(response.contains(" 502 No data received"), "got: {response}");

    shutdown.trigger();
}

#[tokio::test]
async fn test_head_without_blank_line_is_completed() {
    let upstream_addr: SocketAddr = "127.0.0.1:28481".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28482".parse().unwrap();

    // Head cut off before its blank line, then the server closes.
    common::start_mock_upstream(upstream_addr, b"HTTP/1.1 302 Found\r\nLocation: http://elsewhere.test/\r\n").await;
    let shutdown = common::start_proxy(common::proxy_config(proxy_addr)).await;

    let response = common::send_raw(
        proxy_addr,
        b"GET http://127.0.0.1:28481/ HTTP/1.1\r\nHost: 127.0.0.1:28481\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 302 Found\r\n"), "got: {response}");
    assert_eq!(common::header_of(&response, "Location"), Some("http://elsewhere.test/"));

    shutdown.trigger();
}

#[tokio::test]
async fn test_interim_continue_is_relayed() {
    let upstream_addr: SocketAddr = "127.0.0.1:28491".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28492".parse().unwrap();

    common::start_mock_upstream(
        upstream_addr,
        b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\ndone",
    )
    .await;
    let shutdown = common::start_proxy(common::proxy_config(proxy_addr)).await;

    let response = common::send_raw(
        proxy_addr,
        b"GET http://127.0.0.1:28491/ HTTP/1.1\r\nHost: 127.0.0.1:28491\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"), "got: {response}");
    assert!(response.ends_with("\r\n\r\ndone"));

    shutdown.trigger();
}

const CHUNKED_HELLO: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";

fn greeting_filter(config: &mut seeks_proxy::ProxyConfig) {
    config.filters.push(TextFilterConfig {
        name: "greeting".into(),
        pattern: "hello".into(),
        replacement: "howdy".into(),
    });
    config.actions.push(ActionRuleConfig {
        pattern: String::new(),
        settings: ActionSettings {
            filter: vec!["greeting".into()],
            ..ActionSettings::default()
        },
    });
}

/// Read one chunked response, leaving the connection open.
async fn read_chunked_response(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let mut buf = [0u8; 512];
    while !out.ends_with(b"0\r\n\r\n") {
        let n = tokio::time::timeout(Duration::from_secs(3), stream.read(&mut buf))
            .await
            .expect("chunked response did not finish")
            .unwrap();
        assert!(n > 0, "proxy closed early: {}", String::from_utf8_lossy(&out));
        out.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[tokio::test]
async fn test_last_chunk_with_head_ends_filtered_response() {
    let upstream_addr: SocketAddr = "127.0.0.1:28801".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28802".parse().unwrap();

    // The upstream never closes, so only the zero-size chunk ends the body.
    common::start_keep_alive_upstream(upstream_addr, CHUNKED_HELLO).await;
    let mut config = common::proxy_config(proxy_addr);
    greeting_filter(&mut config);
    let shutdown = common::start_proxy(config).await;

    let started = Instant::now();
    let response = common::send_raw(
        proxy_addr,
        b"GET http://127.0.0.1:28801/ HTTP/1.1\r\nHost: 127.0.0.1:28801\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(started.elapsed() < Duration::from_secs(3), "waited for the socket timeout");
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got: {response}");
    assert_eq!(common::body_of(&response), "howdy");

    shutdown.trigger();
}

#[tokio::test]
async fn test_split_last_chunk_ends_filtered_response() {
    let upstream_addr: SocketAddr = "127.0.0.1:28811".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28812".parse().unwrap();

    common::start_keep_alive_upstream_in_pieces(
        upstream_addr,
        vec![
            b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nTransfer-Encoding: chunked\r\n\r\n",
            b"5\r\nhello\r\n0\r",
            b"\n\r\n",
        ],
    )
    .await;
    let mut config = common::proxy_config(proxy_addr);
    greeting_filter(&mut config);
    let shutdown = common::start_proxy(config).await;

    let started = Instant::now();
    let response = common::send_raw(
        proxy_addr,
        b"GET http://127.0.0.1:28811/ HTTP/1.1\r\nHost: 127.0.0.1:28811\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(started.elapsed() < Duration::from_secs(3), "waited for the socket timeout");
    assert_eq!(common::body_of(&response), "howdy");

    shutdown.trigger();
}

#[tokio::test]
async fn test_streamed_chunked_responses_on_kept_alive_connections() {
    let upstream_addr: SocketAddr = "127.0.0.1:28821".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28822".parse().unwrap();

    // Head with part of the body, then the terminal chunk split in two.
    let accepted = common::start_keep_alive_upstream_in_pieces(
        upstream_addr,
        vec![
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhel",
            b"lo\r\n0\r",
            b"\n\r\n",
        ],
    )
    .await;
    let shutdown = common::start_proxy(common::proxy_config(proxy_addr)).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    for path in ["/first", "/second"] {
        let request = format!("GET http://127.0.0.1:28821{path} HTTP/1.1\r\nHost: 127.0.0.1:28821\r\n\r\n");
        client.write_all(request.as_bytes()).await.unwrap();
        let response = read_chunked_response(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got: {response}");
        assert!(response.ends_with("\r\n\r\n5\r\nhello\r\n0\r\n\r\n"));
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    shutdown.trigger();
}
