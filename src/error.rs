//! Crate-wide error kinds.
//!
//! Every failure inside the relay machinery maps onto one of these kinds.
//! The relay loop turns them into canned responses; nothing here is fatal
//! to the process.

use thiserror::Error;

/// Errors raised while parsing, buffering or decoding proxied traffic.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed request line, response line, header or body framing.
    #[error("parse error: {0}")]
    Parse(String),

    /// A buffer would have grown past the configured limit.
    #[error("buffer limit of {limit} bytes reached")]
    Memory { limit: usize },

    /// Template or configuration file problem.
    #[error("file error: {0}")]
    File(String),

    /// Decompression failed.
    #[error("compression error: {0}")]
    Compress(String),

    /// Malformed parameters handed to an intercepted page.
    #[error("invalid parameters: {0}")]
    CgiParams(String),

    /// Socket level failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Shorthand for a parse error with a message.
    pub fn parse(msg: impl Into<String>) -> Self {
        ProxyError::Parse(msg.into())
    }

    /// Shorthand for a compression error with a message.
    pub fn compress(msg: impl Into<String>) -> Self {
        ProxyError::Compress(msg.into())
    }
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert() {
        fn fails() -> ProxyResult<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(ProxyError::Io(_))));
    }

    #[test]
    fn memory_error_names_limit() {
        let err = ProxyError::Memory { limit: 4096 };
        assert_eq!(err.to_string(), "buffer limit of 4096 bytes reached");
    }
}
