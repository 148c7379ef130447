//! Body decoding: chunked transfer coding and gzip/deflate.
//!
//! # Data Flow
//! ```text
//! buffered response body
//!     → remove_chunked_transfer_coding   (if Transfer-Encoding: chunked)
//!     → decompress                       (if Content-Encoding: gzip|deflate)
//!     → content filters
//! ```
//!
//! # Design Decisions
//! - Both decoders walk an immutable input slice with explicit bounds
//!   checks and build a fresh output buffer
//! - Inflate output grows by doubling and never past the buffer limit

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{ProxyError, ProxyResult};
use crate::http::iob::Iob;

const GZIP_ID1: u8 = 0x1f;
const GZIP_ID2: u8 = 0x8b;
const GZIP_METHOD_DEFLATE: u8 = 0x08;

const GZIP_FLAG_CHECKSUM: u8 = 0x02;
const GZIP_FLAG_EXTRA_FIELDS: u8 = 0x04;
const GZIP_FLAG_FILE_NAME: u8 = 0x08;
const GZIP_FLAG_COMMENT: u8 = 0x10;
const GZIP_FLAG_RESERVED_BITS: u8 = 0xe0;

const MIN_COMPRESSED_LEN: usize = 10;

/// Content codings the decoder can undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCoding {
    Gzip,
    Deflate,
}

/// Read the hex chunk size at the start of `data` the way `%x` would:
/// leading white space and an optional `0x` are skipped.
fn scan_hex(data: &[u8]) -> Option<usize> {
    let mut pos = 0;
    while pos < data.len() && data[pos].is_ascii_whitespace() {
        pos += 1;
    }
    if data.len() > pos + 1 && data[pos] == b'0' && (data[pos + 1] == b'x' || data[pos + 1] == b'X') {
        if data.get(pos + 2).is_some_and(|b| b.is_ascii_hexdigit()) {
            pos += 2;
        }
    }

    let digits = data[pos..].iter().take_while(|b| b.is_ascii_hexdigit()).count();
    if digits == 0 {
        return None;
    }
    let text = std::str::from_utf8(&data[pos..pos + digits]).ok()?;
    usize::from_str_radix(text, 16).ok()
}

fn find_crlf(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|offset| from + offset)
}

/// Strip chunked framing and return the payload.
///
/// An unparsable first chunk size, a missing CRLF or a chunk running past
/// the end of the buffer is a parse error. A bad size after the first
/// chunk ends decoding with what was gathered so far.
pub fn remove_chunked_transfer_coding(body: &[u8]) -> ProxyResult<Vec<u8>> {
    let mut chunk_size = scan_hex(body).ok_or_else(|| {
        tracing::error!("Invalid first chunksize while stripping chunked transfer coding");
        ProxyError::parse("invalid first chunk size")
    })?;

    let mut out = Vec::with_capacity(body.len());
    let mut pos = 0;

    while chunk_size > 0 {
        let crlf = find_crlf(body, pos).ok_or_else(|| {
            tracing::error!("Parse error while stripping chunked transfer coding");
            ProxyError::parse("missing CRLF after chunk size")
        })?;

        if out.len() + chunk_size >= body.len() {
            tracing::error!(
                chunk_size,
                buffer_size = body.len(),
                "Chunk size exceeds buffer size in chunked transfer coding"
            );
            return Err(ProxyError::parse("chunk exceeds buffer"));
        }

        let start = crlf + 2;
        let end = start + chunk_size;
        if end > body.len() {
            return Err(ProxyError::parse("chunk data truncated"));
        }
        out.extend_from_slice(&body[start..end]);
        pos = (end + 2).min(body.len());

        match scan_hex(&body[pos..]) {
            Some(next) => chunk_size = next,
            None => {
                tracing::info!("Invalid chunked transfer encoding detected and ignored");
                break;
            }
        }
    }

    tracing::debug!(from = body.len(), to = out.len(), "De-chunking successful");
    Ok(out)
}

/// Offset of the deflate stream inside a gzip member.
fn skip_gzip_header(data: &[u8]) -> ProxyResult<usize> {
    if data[0] != GZIP_ID1 || data[1] != GZIP_ID2 || data[2] != GZIP_METHOD_DEFLATE {
        tracing::error!("Invalid gzip header when decompressing");
        return Err(ProxyError::compress("invalid gzip header"));
    }

    let flags = data[3];
    if flags & GZIP_FLAG_RESERVED_BITS != 0 {
        tracing::error!(flags, "Invalid gzip header flags when decompressing");
        return Err(ProxyError::compress("invalid gzip header flags"));
    }

    // magic, method and flags, then mtime, xfl and os
    let mut cur = 4 + 6;

    if flags & GZIP_FLAG_EXTRA_FIELDS != 0 {
        let len_bytes = data
            .get(cur..cur + 2)
            .ok_or_else(|| ProxyError::compress("truncated gzip extra field"))?;
        let skip = usize::from(len_bytes[0]) | (usize::from(len_bytes[1]) << 8);
        cur += 2;
        if skip >= data.len().saturating_sub(cur) {
            tracing::error!(skip, "Unreasonable amount of bytes to skip, stopping decompression");
            return Err(ProxyError::compress("gzip extra field too long"));
        }
        cur += skip;
    }

    for flag in [GZIP_FLAG_FILE_NAME, GZIP_FLAG_COMMENT] {
        if flags & flag != 0 {
            match data.get(cur..).and_then(|rest| rest.iter().position(|b| *b == 0)) {
                Some(nul) => cur += nul + 1,
                None => cur = data.len(),
            }
        }
    }

    if flags & GZIP_FLAG_CHECKSUM != 0 {
        cur += 2;
    }

    if cur >= data.len() {
        tracing::error!("Malformed gzip header detected, aborting decompression");
        return Err(ProxyError::compress("malformed gzip header"));
    }
    Ok(cur)
}

/// Some servers send zlib-wrapped data under `deflate`; skip that wrapper.
fn zlib_header_len(data: &[u8]) -> usize {
    match data {
        [cmf, flg, ..] if cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0 => 2,
        _ => 0,
    }
}

/// Inflate a gzip or deflate body, growing the output up to `limit` bytes.
pub fn decompress(data: &[u8], coding: ContentCoding, limit: usize) -> ProxyResult<Vec<u8>> {
    if data.len() < MIN_COMPRESSED_LEN {
        tracing::error!(len = data.len(), "Buffer too small decompressing body");
        return Err(ProxyError::compress("body too small to decompress"));
    }

    let input: Vec<u8> = match coding {
        ContentCoding::Gzip => data[skip_gzip_header(data)?..].to_vec(),
        ContentCoding::Deflate => {
            // raw deflate streams are often cut short; a trailing pad byte lets inflate finish
            let mut raw = data[zlib_header_len(data)..].to_vec();
            raw.push(0);
            raw
        }
    };

    let mut inflater = Decompress::new(false);
    let initial = (data.len() * 2).clamp(MIN_COMPRESSED_LEN, limit.max(MIN_COMPRESSED_LEN));
    let mut out: Vec<u8> = Vec::with_capacity(initial);

    loop {
        let in_before = inflater.total_in();
        let out_before = inflater.total_out();
        let offset = in_before as usize;

        let status = inflater
            .decompress_vec(&input[offset..], &mut out, FlushDecompress::Finish)
            .map_err(|e| {
                tracing::error!(error = %e, "Unexpected error while decompressing");
                ProxyError::compress(e.to_string())
            })?;

        if status == Status::StreamEnd {
            break;
        }

        if inflater.total_in() as usize >= input.len() {
            tracing::warn!("Unexpected end of compressed body, using what we got so far");
            break;
        }

        if out.len() == out.capacity() {
            if out.capacity() >= limit {
                tracing::error!(limit, "Buffer limit reached while decompressing");
                return Err(ProxyError::Memory { limit });
            }
            let target = (out.capacity() * 2).min(limit);
            out.reserve_exact(target - out.len());
            continue;
        }

        if inflater.total_in() == in_before && inflater.total_out() == out_before {
            return Err(ProxyError::compress("inflate stalled before end of stream"));
        }
    }

    tracing::debug!(
        compressed = data.len(),
        decompressed = out.len(),
        coding = ?coding,
        "Decompression successful"
    );
    Ok(out)
}

/// Decompress the unconsumed part of an [`Iob`] in place.
pub fn decompress_iob(iob: &mut Iob, coding: ContentCoding) -> ProxyResult<()> {
    let limit = iob.limit();
    let decoded = decompress(iob.unconsumed(), coding, limit)?;
    iob.replace_unconsumed(decoded)
}
