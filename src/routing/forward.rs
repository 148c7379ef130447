//! Forwarding resolution.
//!
//! Each rule pairs a URL pattern with a tunnel type, an optional SOCKS
//! gateway and an optional HTTP parent proxy. Rules are checked in
//! configuration order and the first match wins; without a match the
//! request goes out directly.

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, ProxyResult};
use crate::http::request::HttpRequest;
use crate::routing::matcher::{Matcher, UrlPattern};

pub const DEFAULT_SOCKS_PORT: u16 = 1080;
pub const DEFAULT_PARENT_PORT: u16 = 8000;

/// Tunnel used to reach the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardType {
    #[default]
    None,
    Socks4,
    Socks4a,
    Socks5,
}

impl fmt::Display for ForwardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ForwardType::None => "none",
            ForwardType::Socks4 => "socks4",
            ForwardType::Socks4a => "socks4a",
            ForwardType::Socks5 => "socks5",
        };
        f.write_str(name)
    }
}

/// Host and port of a gateway or parent proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForwarderAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ForwarderAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parse `host[:port]` or `[v6addr][:port]`, falling back to `default_port`.
pub fn parse_forwarder_address(address: &str, default_port: u16) -> ProxyResult<ForwarderAddress> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ProxyError::parse("empty forwarder address"));
    }

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| ProxyError::parse(format!("missing ']' in {address}")))?;
        (&rest[..close], rest[close + 1..].strip_prefix(':'))
    } else {
        match address.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    let port = match port {
        Some(text) => text
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| ProxyError::parse(format!("invalid port in {address}")))?,
        None => default_port,
    };

    Ok(ForwarderAddress {
        host: host.to_string(),
        port,
    })
}

/// Where and how to send a matching request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ForwardSpec {
    pub forward_type: ForwardType,
    /// SOCKS gateway.
    pub gateway: Option<ForwarderAddress>,
    /// HTTP parent proxy.
    pub forward: Option<ForwarderAddress>,
}

impl ForwardSpec {
    /// Direct connection, no tunnel.
    pub fn direct() -> &'static ForwardSpec {
        static DIRECT: OnceLock<ForwardSpec> = OnceLock::new();
        DIRECT.get_or_init(ForwardSpec::default)
    }

    pub fn is_direct(&self) -> bool {
        self.forward_type == ForwardType::None && self.forward.is_none()
    }

    /// Requests go to an HTTP parent proxy, which wants absolute URLs.
    pub fn has_parent(&self) -> bool {
        self.forward.is_some()
    }

    /// Same forwarder identity: type, gateway and parent all equal,
    /// hosts compared case-insensitively.
    pub fn same_forwarder(&self, other: &ForwardSpec) -> bool {
        fn same(a: &Option<ForwarderAddress>, b: &Option<ForwarderAddress>) -> bool {
            match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => a.port == b.port && a.host.eq_ignore_ascii_case(&b.host),
                _ => false,
            }
        }
        self.forward_type == other.forward_type
            && same(&self.gateway, &other.gateway)
            && same(&self.forward, &other.forward)
    }
}

/// A pattern together with the forwarder it selects.
#[derive(Debug)]
pub struct ForwardRule {
    pub pattern: UrlPattern,
    pub spec: ForwardSpec,
}

impl ForwardRule {
    /// Build a rule from its configured parts. A parent of `"."` means none.
    pub fn new(
        pattern: &str,
        forward_type: ForwardType,
        gateway: Option<&str>,
        forward: Option<&str>,
    ) -> ProxyResult<Self> {
        let pattern = UrlPattern::parse(pattern)?;

        let gateway = match (forward_type, gateway) {
            (ForwardType::None, _) => None,
            (_, Some(addr)) => Some(parse_forwarder_address(addr, DEFAULT_SOCKS_PORT)?),
            (_, None) => {
                return Err(ProxyError::parse(format!(
                    "{forward_type} rule for '{}' needs a gateway",
                    pattern.spec()
                )))
            }
        };

        let forward = match forward.map(str::trim) {
            None | Some(".") | Some("") => None,
            Some(addr) => Some(parse_forwarder_address(addr, DEFAULT_PARENT_PORT)?),
        };

        Ok(Self {
            pattern,
            spec: ForwardSpec {
                forward_type,
                gateway,
                forward,
            },
        })
    }
}

/// Ordered forward rules.
#[derive(Debug, Default)]
pub struct ForwardTable {
    rules: Vec<ForwardRule>,
}

impl ForwardTable {
    pub fn new(rules: Vec<ForwardRule>) -> Self {
        Self { rules }
    }

    /// First matching rule's forwarder, or the direct default.
    pub fn forward_url(&self, http: &HttpRequest) -> &ForwardSpec {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(http))
            .map(|rule| &rule.spec)
            .unwrap_or_else(|| ForwardSpec::direct())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::parse_http_request;

    #[test]
    fn address_parsing() {
        let a = parse_forwarder_address("proxy.test:3128", DEFAULT_PARENT_PORT).unwrap();
        assert_eq!((a.host.as_str(), a.port), ("proxy.test", 3128));

        let b = parse_forwarder_address("socks.test", DEFAULT_SOCKS_PORT).unwrap();
        assert_eq!(b.port, 1080);

        let c = parse_forwarder_address("[::1]:9050", DEFAULT_SOCKS_PORT).unwrap();
        assert_eq!((c.host.as_str(), c.port), ("::1", 9050));
        assert_eq!(c.to_string(), "[::1]:9050");

        assert!(parse_forwarder_address("[::1", DEFAULT_SOCKS_PORT).is_err());
        assert!(parse_forwarder_address("host:notaport", DEFAULT_SOCKS_PORT).is_err());
    }

    #[test]
    fn first_match_wins() {
        let table = ForwardTable::new(vec![
            ForwardRule::new(".onion", ForwardType::Socks4a, Some("127.0.0.1:9050"), None).unwrap(),
            ForwardRule::new("", ForwardType::None, None, Some("parent.test:3128")).unwrap(),
            ForwardRule::new(".example.test", ForwardType::Socks5, Some("127.0.0.1"), None).unwrap(),
        ]);

        let onion = parse_http_request("GET http://abc.onion/ HTTP/1.1").unwrap();
        let spec = table.forward_url(&onion);
        assert_eq!(spec.forward_type, ForwardType::Socks4a);
        assert_eq!(spec.gateway.as_ref().unwrap().port, 9050);

        let other = parse_http_request("GET http://www.example.test/ HTTP/1.1").unwrap();
        let spec = table.forward_url(&other);
        assert_eq!(spec.forward_type, ForwardType::None);
        assert_eq!(spec.forward.as_ref().unwrap().host, "parent.test");
    }

    #[test]
    fn no_match_is_direct() {
        let table = ForwardTable::new(vec![
            ForwardRule::new("only.test", ForwardType::Socks5, Some("gw.test"), None).unwrap(),
        ]);
        let http = parse_http_request("GET http://example.test/ HTTP/1.1").unwrap();
        assert!(table.forward_url(&http).is_direct());
        assert!(ForwardTable::default().forward_url(&http).is_direct());
    }

    #[test]
    fn dot_parent_means_none() {
        let rule = ForwardRule::new("", ForwardType::Socks5, Some("gw.test:1081"), Some(".")).unwrap();
        assert!(rule.spec.forward.is_none());
        assert!(!rule.spec.has_parent());
    }

    #[test]
    fn socks_rule_needs_gateway() {
        assert!(ForwardRule::new("", ForwardType::Socks5, None, None).is_err());
    }

    #[test]
    fn forwarder_identity_ignores_host_case() {
        let a = ForwardRule::new("", ForwardType::Socks5, Some("GW.test:1080"), None).unwrap();
        let b = ForwardRule::new("x", ForwardType::Socks5, Some("gw.TEST"), None).unwrap();
        assert!(a.spec.same_forwarder(&b.spec));
        assert!(!a.spec.same_forwarder(ForwardSpec::direct()));
    }
}
