//! HTTP/1.x wire handling.
//!
//! # Data Flow
//! ```text
//! socket bytes
//!     → iob.rs       (buffer, limit-checked growth)
//!     → headers.rs   (lines, continuation folding, LWS normalisation)
//!     → request.rs   (request line, URL, destination)
//!     → [rewrite pipeline]
//!     → decode.rs    (de-chunk, inflate before filtering)
//!     → response.rs  (canned and crunched replies)
//! ```

pub mod dates;
pub mod decode;
pub mod headers;
pub mod iob;
pub mod request;
pub mod response;

pub use headers::{HeaderEntry, HeaderList, LineRead};
pub use iob::Iob;
pub use request::HttpRequest;
pub use response::{CrunchReason, ErrorPage, HttpResponse};
