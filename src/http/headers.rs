//! Header line extraction, continuation folding and the header list.
//!
//! # Data Flow
//! ```text
//! Iob (raw bytes)
//!     → get_header_line   (one \n-terminated line, \r stripped)
//!     → get_header        (folds continuation lines, normalize_lws)
//!     → HeaderList::enlist
//! ```
//!
//! # Design Decisions
//! - Deleted headers stay in the list as [`HeaderEntry::Deleted`] so
//!   positions never shift while the rewrite tables walk the list
//! - Bytes outside UTF-8 are replaced rather than rejected

use crate::http::iob::Iob;

/// Result of pulling one line or header out of an [`Iob`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// A complete, non-empty line.
    Line(String),
    /// The blank line terminating a header block.
    EndOfHeaders,
    /// No `\n` in the buffer yet; read more data and retry.
    Incomplete,
}

/// Extract the next `\n`-terminated line, truncated at its first `\r`.
pub fn get_header_line(iob: &mut Iob) -> LineRead {
    let data = iob.unconsumed();
    let Some(newline) = data.iter().position(|b| *b == b'\n') else {
        return LineRead::Incomplete;
    };

    let raw = &data[..newline];
    let end = raw.iter().position(|b| *b == b'\r').unwrap_or(raw.len());
    let line = String::from_utf8_lossy(&raw[..end]).into_owned();
    iob.consume(newline + 1);

    if line.is_empty() {
        LineRead::EndOfHeaders
    } else {
        LineRead::Line(line)
    }
}

/// Whether `data` starts with a header whose continuation lines, if
/// any, have all arrived.
fn folded_header_is_complete(data: &[u8]) -> bool {
    let mut at = 0;
    loop {
        let Some(newline) = data[at..].iter().position(|b| *b == b'\n') else {
            return false;
        };
        let blank = at == 0 && matches!(&data[..newline], b"" | b"\r");
        at += newline + 1;
        if blank || !matches!(data.get(at), Some(b' ') | Some(b'\t')) {
            return true;
        }
    }
}

/// Extract the next header, folding continuation lines onto it.
///
/// Nothing is consumed until the last continuation line is complete, so
/// a header split across reads comes out whole on a later call.
pub fn get_header(iob: &mut Iob) -> LineRead {
    if !folded_header_is_complete(iob.unconsumed()) {
        return LineRead::Incomplete;
    }

    let mut header = match get_header_line(iob) {
        LineRead::Line(line) => line,
        other => return other,
    };

    while matches!(iob.unconsumed().first(), Some(b' ') | Some(b'\t')) {
        match get_header_line(iob) {
            LineRead::Line(continued) => header.push_str(&continued),
            _ => {
                tracing::warn!(header = %header, "Failed to read a multi-line header properly");
                break;
            }
        }
    }

    LineRead::Line(normalize_lws(&header))
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

/// Reduce unquoted linear white space to a single character.
///
/// Tabs become spaces, quoted substrings are left untouched, and white
/// space directly in front of the first colon is removed.
pub fn normalize_lws(header: &str) -> String {
    let mut bytes = header.as_bytes().to_vec();
    let mut p = 0;

    while p < bytes.len() {
        if is_space(bytes[p]) && bytes.get(p + 1).is_some_and(|b| is_space(*b)) {
            let mut q = p + 1;
            while q < bytes.len() && is_space(bytes[q]) {
                q += 1;
            }
            tracing::trace!(header = %header, "Reducing white space");
            bytes.drain(p + 1..q);
        }

        if bytes[p] == b'\t' {
            bytes[p] = b' ';
        } else if bytes[p] == b'"' {
            match bytes[p + 1..].iter().position(|b| *b == b'"') {
                Some(offset) => p += offset + 1,
                None => tracing::trace!(header = %header, "Ignoring single quote"),
            }
        }
        p += 1;
    }

    if let Some(colon) = bytes.iter().position(|b| *b == b':') {
        if colon > 0 && is_space(bytes[colon - 1]) {
            bytes.remove(colon - 1);
        }
    }

    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Case-insensitive ASCII prefix test.
pub fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Case-insensitive ASCII substring test.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
}

/// One slot in a [`HeaderList`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderEntry {
    Present(String),
    Deleted,
}

/// Ordered list of raw header lines; the first entry is the start line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<HeaderEntry>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header line.
    pub fn enlist(&mut self, line: impl Into<String>) {
        self.entries.push(HeaderEntry::Present(line.into()));
    }

    /// The start line, if still present.
    pub fn first(&self) -> Option<&str> {
        match self.entries.first() {
            Some(HeaderEntry::Present(s)) => Some(s),
            _ => None,
        }
    }

    /// Replace the start line, or enlist it when the list is empty.
    pub fn set_first(&mut self, line: impl Into<String>) {
        match self.entries.first_mut() {
            Some(slot) => *slot = HeaderEntry::Present(line.into()),
            None => self.enlist(line),
        }
    }

    /// All slots, deleted ones included.
    pub fn entries(&self) -> &[HeaderEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [HeaderEntry] {
        &mut self.entries
    }

    /// Present header lines in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| match e {
            HeaderEntry::Present(s) => Some(s.as_str()),
            HeaderEntry::Deleted => None,
        })
    }

    /// Number of present lines.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Value of the first header whose name matches `name` (colon included),
    /// with leading spaces skipped.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|h| starts_with_ignore_case(h, name))
            .map(|h| h[name.len()..].trim_start_matches(' '))
    }

    /// Whether any present header starts with `prefix`.
    pub fn contains_prefix(&self, prefix: &str) -> bool {
        self.iter().any(|h| starts_with_ignore_case(h, prefix))
    }

    /// Serialize as a header block: each line CRLF-terminated plus a blank line.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for line in self.iter() {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}
