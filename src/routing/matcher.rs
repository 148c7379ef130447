//! URL pattern matching for forward and action rules.
//!
//! # Responsibilities
//! - Parse `host[:portlist][/path-regex]` patterns
//! - Match hosts component-wise with simple globbing
//! - Match ports against lists and ranges
//! - Match paths against a left-anchored, case-insensitive regex
//!
//! # Design Decisions
//! - Host matching is case-insensitive
//! - A leading `.` leaves the host unanchored on the left, a trailing `.`
//!   on the right
//! - Empty condition = always matches (wildcard)
//! - IPv6 hosts are written `<addr>` so their colons are not taken as a
//!   port separator

use regex::{Regex, RegexBuilder};

use crate::error::{ProxyError, ProxyResult};
use crate::http::request::HttpRequest;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &HttpRequest) -> bool;
}

/// Glob match of a single host component.
///
/// Supports `*`, `?` and `[...]` character classes with ranges.
pub fn simple_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();
    let at = |i: usize| pattern.get(i).copied().unwrap_or(0);

    let mut pat = 0usize;
    let mut txt = 0usize;
    let mut fallback = 0usize;
    let mut wildcard = false;
    let mut lastchar = b'a';
    let mut charmap = [0u8; 32];

    while txt < text.len() {
        if at(pat) == 0 {
            if wildcard {
                pat = fallback;
            } else {
                return false;
            }
        }

        if at(pat) == b'*' {
            pat += 1;
            if at(pat) == 0 {
                return true;
            }
            wildcard = true;
            fallback = pat;
        }

        if at(pat) == b'[' {
            charmap = [0u8; 32];
            loop {
                pat += 1;
                let c = at(pat);
                if c == b']' {
                    break;
                } else if c == 0 {
                    return false;
                } else if c == b'-' {
                    pat += 1;
                    let hi = at(pat);
                    if hi == b']' || hi == 0 {
                        return false;
                    }
                    for i in lastchar..=hi {
                        charmap[usize::from(i / 8)] |= 1 << (i % 8);
                    }
                } else {
                    charmap[usize::from(c / 8)] |= 1 << (c % 8);
                    lastchar = c;
                }
            }
        }

        let t = text[txt];
        let in_class = charmap[usize::from(t / 8)] & (1 << (t % 8)) != 0;
        if at(pat) == t || at(pat) == b'?' || (at(pat) == b']' && in_class) {
            pat += 1;
        } else if !wildcard {
            return false;
        } else if pat != fallback {
            if at(pat) == b']' {
                txt += 1;
            }
            pat = fallback;
            continue;
        }
        txt += 1;
    }

    if at(pat) == b'*' {
        pat += 1;
    }
    at(pat) == 0
}

fn domain_components(host: &str) -> Vec<String> {
    host.to_ascii_lowercase()
        .split('.')
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Matches the destination host component by component.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    components: Vec<String>,
    unanchored_left: bool,
    unanchored_right: bool,
}

impl HostMatcher {
    /// Create a new host matcher.
    /// The pattern is normalized to lowercase for case-insensitive matching.
    pub fn new(pattern: &str) -> Self {
        Self {
            components: domain_components(pattern),
            unanchored_left: pattern.starts_with('.'),
            unanchored_right: pattern.ends_with('.'),
        }
    }

    fn compare(&self, fqdn: &[String]) -> bool {
        self.components
            .iter()
            .zip(fqdn)
            .all(|(p, f)| simple_match(p, f))
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &HttpRequest) -> bool {
        let fqdn = domain_components(&req.host);
        let plen = self.components.len();
        let flen = fqdn.len();
        if flen < plen {
            return false;
        }

        match (self.unanchored_left, self.unanchored_right) {
            (true, false) => self.compare(&fqdn[flen - plen..]),
            (false, false) => flen == plen && self.compare(&fqdn),
            (false, true) => self.compare(&fqdn[..plen]),
            (true, true) => (0..=flen - plen).any(|n| self.compare(&fqdn[n..])),
        }
    }
}

/// Matches the destination port against `80,443,8000-8080`-style lists.
#[derive(Debug, Clone)]
pub struct PortMatcher {
    ranges: Vec<(u16, u16)>,
}

impl PortMatcher {
    pub fn new(list: &str) -> Self {
        let ranges = list
            .trim_start_matches(':')
            .split(',')
            .filter(|item| !item.trim().is_empty())
            .map(|item| match item.split_once('-') {
                Some((min, max)) => {
                    let max = leading_number(max);
                    (leading_number(min), if max == 0 { u16::MAX } else { max })
                }
                None => {
                    let port = leading_number(item);
                    (port, port)
                }
            })
            .collect();
        Self { ranges }
    }

    pub fn port_matches(&self, port: u16) -> bool {
        self.ranges.iter().any(|(min, max)| port >= *min && port <= *max)
    }
}

fn leading_number(text: &str) -> u16 {
    let digits: String = text.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

impl Matcher for PortMatcher {
    fn matches(&self, req: &HttpRequest) -> bool {
        self.port_matches(req.port)
    }
}

/// Matches the request path against a regex anchored at its start.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    regex: Regex,
}

impl PathMatcher {
    pub fn new(pattern: &str) -> ProxyResult<Self> {
        let regex = RegexBuilder::new(&format!("^(?:{pattern})"))
            .case_insensitive(true)
            .build()
            .map_err(|e| ProxyError::parse(format!("invalid path pattern {pattern}: {e}")))?;
        Ok(Self { regex })
    }
}

impl Matcher for PathMatcher {
    fn matches(&self, req: &HttpRequest) -> bool {
        self.regex.is_match(&req.path)
    }
}

/// A compiled `host[:portlist][/path]` pattern. All present parts must match.
#[derive(Debug)]
pub struct UrlPattern {
    spec: String,
    matchers: Vec<Box<dyn Matcher>>,
}

impl UrlPattern {
    /// Compile a pattern. The empty pattern matches every request.
    pub fn parse(spec: &str) -> ProxyResult<Self> {
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();

        let (hostport, path) = match spec.find('/') {
            Some(slash) => (&spec[..slash], Some(&spec[slash..])),
            None => (spec, None),
        };

        let (host, ports) = if let Some(rest) = hostport.strip_prefix('<') {
            let close = rest
                .find('>')
                .ok_or_else(|| ProxyError::parse(format!("unterminated IPv6 host in {spec}")))?;
            let after = &rest[close + 1..];
            if !after.is_empty() && !after.starts_with(':') {
                return Err(ProxyError::parse(format!("garbage after IPv6 host in {spec}")));
            }
            (&rest[..close], (!after.is_empty()).then_some(after))
        } else {
            match hostport.find(':') {
                Some(colon) => (&hostport[..colon], Some(&hostport[colon..])),
                None => (hostport, None),
            }
        };

        if !host.is_empty() {
            matchers.push(Box::new(HostMatcher::new(host)));
        }
        if let Some(ports) = ports {
            matchers.push(Box::new(PortMatcher::new(ports)));
        }
        if let Some(path) = path.filter(|p| p.len() > 1) {
            matchers.push(Box::new(PathMatcher::new(path)?));
        }

        Ok(Self {
            spec: spec.to_string(),
            matchers,
        })
    }

    /// Pattern text as configured.
    pub fn spec(&self) -> &str {
        &self.spec
    }
}

impl Matcher for UrlPattern {
    fn matches(&self, req: &HttpRequest) -> bool {
        // All matchers must pass (AND)
        self.matchers.iter().all(|m| m.matches(req))
    }
}
