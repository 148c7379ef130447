//! SOCKS4, SOCKS4A and SOCKS5 client negotiation.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};

use crate::gateway::connect::connect_to;
use crate::gateway::GatewayError;
use crate::routing::forward::{ForwardSpec, ForwardType};

const SOCKS_USERID: &[u8] = b"anonymous";

const SOCKS4_VERSION: u8 = 4;
const SOCKS4_CONNECT: u8 = 1;
const SOCKS4_REPLY_LEN: usize = 8;
const SOCKS4_GRANTED: u8 = 90;
const SOCKS4_REJECTED: u8 = 91;
const SOCKS4_IDENT_FAILED: u8 = 92;
const SOCKS4_IDENT_CONFLICT: u8 = 93;

/// SOCKS4A placeholder address asking the gateway to resolve the name.
const SOCKS4A_PLACEHOLDER: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 1);

const SOCKS5_VERSION: u8 = 5;
const SOCKS5_NO_AUTH: u8 = 0x00;
const SOCKS5_NO_ACCEPTABLE_METHOD: u8 = 0xff;
const SOCKS5_CONNECT: u8 = 1;
const SOCKS5_ATYP_IPV4: u8 = 1;
const SOCKS5_ATYP_DOMAIN: u8 = 3;
const SOCKS5_ATYP_IPV6: u8 = 4;

/// Build the SOCKS4/4A CONNECT record.
pub fn socks4_request(forward_type: ForwardType, target: Ipv4Addr, host: &str, port: u16) -> Vec<u8> {
    let mut request = Vec::with_capacity(9 + SOCKS_USERID.len() + host.len() + 1);
    request.push(SOCKS4_VERSION);
    request.push(SOCKS4_CONNECT);
    request.extend_from_slice(&port.to_be_bytes());
    request.extend_from_slice(&target.octets());
    request.extend_from_slice(SOCKS_USERID);
    request.push(0);
    if forward_type == ForwardType::Socks4a {
        request.extend_from_slice(host.as_bytes());
        request.push(0);
    }
    request
}

/// Build the SOCKS5 CONNECT request with domain-name addressing.
pub fn socks5_request(host: &str, port: u16) -> Result<Vec<u8>, GatewayError> {
    let len = u8::try_from(host.len()).map_err(|_| GatewayError::Socks5HostTooLong)?;
    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[SOCKS5_VERSION, SOCKS5_CONNECT, 0x00, SOCKS5_ATYP_DOMAIN, len]);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}

/// Run the SOCKS4/4A exchange over an already connected stream.
pub async fn negotiate_socks4<S>(stream: &mut S, request: &[u8]) -> Result<(), GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request).await.map_err(|_| GatewayError::Socks4Write)?;

    let mut reply = [0u8; SOCKS4_REPLY_LEN];
    stream.read_exact(&mut reply).await.map_err(|_| GatewayError::Socks4Read)?;

    match reply[1] {
        SOCKS4_GRANTED => Ok(()),
        SOCKS4_REJECTED => Err(GatewayError::Socks4Rejected),
        SOCKS4_IDENT_FAILED => Err(GatewayError::Socks4IdentFailed),
        SOCKS4_IDENT_CONFLICT => Err(GatewayError::Socks4IdentConflict),
        code => Err(GatewayError::Socks4Unknown(code)),
    }
}

/// Run both SOCKS5 round trips over an already connected stream.
///
/// The CONNECT request is only sent once the gateway has accepted
/// unauthenticated access.
pub async fn negotiate_socks5<S>(stream: &mut S, host: &str, port: u16) -> Result<(), GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let connect_request = socks5_request(host, port)?;

    stream
        .write_all(&[SOCKS5_VERSION, 1, SOCKS5_NO_AUTH])
        .await
        .map_err(|_| GatewayError::Socks5Write)?;

    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.map_err(|_| GatewayError::Socks5Read)?;
    if method[0] != SOCKS5_VERSION {
        return Err(GatewayError::Socks5Version);
    }
    if method[1] == SOCKS5_NO_ACCEPTABLE_METHOD {
        return Err(GatewayError::Socks5AuthRequired);
    }
    if method[1] != SOCKS5_NO_AUTH {
        return Err(GatewayError::Socks5Protocol);
    }

    stream
        .write_all(&connect_request)
        .await
        .map_err(|_| GatewayError::Socks5Write)?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.map_err(|_| GatewayError::Socks5Read)?;
    if head[0] != SOCKS5_VERSION {
        return Err(GatewayError::Socks5Version);
    }
    if head[2] != 0x00 {
        return Err(GatewayError::Socks5Protocol);
    }
    if head[1] != 0x00 {
        return Err(GatewayError::Socks5Reply(head[1]));
    }

    // Skip the bound address so the stream starts at the HTTP response.
    let remaining = match head[3] {
        SOCKS5_ATYP_IPV4 => 4 + 2,
        SOCKS5_ATYP_IPV6 => 16 + 2,
        SOCKS5_ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.map_err(|_| GatewayError::Socks5Read)?;
            usize::from(len[0]) + 2
        }
        _ => return Err(GatewayError::Socks5Protocol),
    };
    let mut bound = vec![0u8; remaining];
    stream.read_exact(&mut bound).await.map_err(|_| GatewayError::Socks5Read)?;
    Ok(())
}

/// Resolve `host` to an IPv4 address for plain SOCKS4.
async fn resolve_ipv4(host: &str, port: u16) -> Result<Ipv4Addr, GatewayError> {
    let resolve_error = || GatewayError::Resolve { host: host.to_string() };
    let addrs = lookup_host((host, port)).await.map_err(|_| resolve_error())?;
    addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(resolve_error)
}

/// Connect to `host:port` through the SOCKS4/4A gateway of `fwd`.
pub async fn socks4_connect(
    fwd: &ForwardSpec,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, GatewayError> {
    let gateway = fwd.gateway.as_ref().ok_or(GatewayError::MissingGateway)?;

    let target = match fwd.forward_type {
        ForwardType::Socks4a => SOCKS4A_PLACEHOLDER,
        _ => resolve_ipv4(host, port).await?,
    };
    let request = socks4_request(fwd.forward_type, target, host, port);

    let mut stream = connect_to(&gateway.host, gateway.port, timeout)
        .await
        .map_err(|e| {
            tracing::debug!(gateway = %gateway, error = %e, "SOCKS4 gateway connect failed");
            GatewayError::Socks4Unreachable {
                gateway: gateway.to_string(),
            }
        })?;

    match tokio::time::timeout(timeout, negotiate_socks4(&mut stream, &request)).await {
        Ok(Ok(())) => Ok(stream),
        Ok(Err(e)) => {
            tracing::warn!(gateway = %gateway, host = %host, error = %e, "socks4_connect failed");
            Err(e)
        }
        Err(_) => Err(GatewayError::Socks4Read),
    }
}

/// Connect to `host:port` through the SOCKS5 gateway of `fwd`.
pub async fn socks5_connect(
    fwd: &ForwardSpec,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, GatewayError> {
    let gateway = fwd.gateway.as_ref().ok_or(GatewayError::MissingGateway)?;
    if host.len() > usize::from(u8::MAX) {
        return Err(GatewayError::Socks5HostTooLong);
    }

    let mut stream = connect_to(&gateway.host, gateway.port, timeout)
        .await
        .map_err(|e| {
            tracing::debug!(gateway = %gateway, error = %e, "SOCKS5 gateway connect failed");
            GatewayError::Socks5Unreachable
        })?;

    match tokio::time::timeout(timeout, negotiate_socks5(&mut stream, host, port)).await {
        Ok(Ok(())) => Ok(stream),
        Ok(Err(e)) => {
            tracing::warn!(gateway = %gateway, host = %host, error = %e, "socks5_connect failed");
            Err(e)
        }
        Err(_) => Err(GatewayError::Socks5Read),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn socks4_record_layout() {
        let request = socks4_request(ForwardType::Socks4, Ipv4Addr::new(10, 1, 2, 3), "ignored", 80);
        assert_eq!(&request[..8], &[4, 1, 0, 80, 10, 1, 2, 3]);
        assert_eq!(&request[8..], b"anonymous\0");
    }

    #[test]
    fn socks4a_appends_host() {
        let request = socks4_request(ForwardType::Socks4a, SOCKS4A_PLACEHOLDER, "example.test", 443);
        assert_eq!(&request[..8], &[4, 1, 1, 187, 0, 0, 0, 1]);
        assert!(request.ends_with(b"anonymous\0example.test\0"));
    }

    #[test]
    fn socks5_rejects_long_names() {
        let host = "a".repeat(256);
        assert!(matches!(socks5_request(&host, 80), Err(GatewayError::Socks5HostTooLong)));
        let request = socks5_request("example.test", 80).unwrap();
        assert_eq!(&request[..5], &[5, 1, 0, 3, 12]);
        assert_eq!(&request[request.len() - 2..], &[0, 80]);
    }

    async fn socks4_with_reply(code: u8) -> Result<(), GatewayError> {
        let (mut proxy, mut gateway) = duplex(256);
        let request = socks4_request(ForwardType::Socks4a, SOCKS4A_PLACEHOLDER, "example.test", 80);
        let expected = request.clone();
        let server = tokio::spawn(async move {
            let mut received = vec![0u8; expected.len()];
            gateway.read_exact(&mut received).await.unwrap();
            assert_eq!(received, expected);
            gateway.write_all(&[0, code, 0, 80, 0, 0, 0, 1]).await.unwrap();
        });
        let result = negotiate_socks4(&mut proxy, &request).await;
        server.await.unwrap();
        result
    }

    #[tokio::test]
    async fn socks4_reply_codes() {
        assert!(socks4_with_reply(90).await.is_ok());
        assert!(matches!(socks4_with_reply(91).await, Err(GatewayError::Socks4Rejected)));
        assert!(matches!(socks4_with_reply(92).await, Err(GatewayError::Socks4IdentFailed)));
        assert!(matches!(socks4_with_reply(93).await, Err(GatewayError::Socks4IdentConflict)));
        assert!(matches!(socks4_with_reply(17).await, Err(GatewayError::Socks4Unknown(17))));
    }

    #[tokio::test]
    async fn socks5_auth_required_stops_before_connect() {
        let (mut proxy, mut gateway) = duplex(256);
        let server = tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            gateway.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [5, 1, 0]);
            gateway.write_all(&[5, 0xff]).await.unwrap();
            // Nothing else may arrive.
            let mut rest = Vec::new();
            gateway.read_to_end(&mut rest).await.unwrap();
            rest
        });
        let result = negotiate_socks5(&mut proxy, "example.test", 80).await;
        assert!(matches!(result, Err(GatewayError::Socks5AuthRequired)));
        drop(proxy);
        assert!(server.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn socks5_granted_consumes_bound_address() {
        let (mut proxy, mut gateway) = duplex(256);
        let server = tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            gateway.read_exact(&mut greeting).await.unwrap();
            gateway.write_all(&[5, 0]).await.unwrap();
            let mut connect = [0u8; 5 + 12 + 2];
            gateway.read_exact(&mut connect).await.unwrap();
            assert_eq!(&connect[5..17], b"example.test");
            gateway
                .write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0x1f, 0x90])
                .await
                .unwrap();
            gateway.write_all(b"HTTP/1.1").await.unwrap();
        });
        negotiate_socks5(&mut proxy, "example.test", 80).await.unwrap();
        let mut after = [0u8; 8];
        proxy.read_exact(&mut after).await.unwrap();
        assert_eq!(&after, b"HTTP/1.1");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn socks5_failure_codes_map_to_messages() {
        let (mut proxy, mut gateway) = duplex(256);
        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            gateway.read_exact(&mut greeting).await.unwrap();
            gateway.write_all(&[5, 0]).await.unwrap();
            let mut connect = [0u8; 5 + 12 + 2];
            gateway.read_exact(&mut connect).await.unwrap();
            gateway.write_all(&[5, 4, 0, 1, 0, 0, 0, 0, 0, 0]).await.unwrap();
        });
        let err = negotiate_socks5(&mut proxy, "example.test", 80).await.unwrap_err();
        assert_eq!(err.to_string(), "SOCKS5 host unreachable");
    }
}
