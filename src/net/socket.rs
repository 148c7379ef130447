//! Socket probes that never consume data.

use std::io::ErrorKind;
use std::mem::MaybeUninit;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpStream;

/// Whether an idle socket can still carry another exchange.
///
/// Non-blocking `MSG_PEEK`: nothing to read means the peer is still there,
/// pending bytes mean it is too, and end of file or an error means it is
/// gone.
pub fn socket_is_still_usable(stream: &TcpStream) -> bool {
    let mut probe = [MaybeUninit::<u8>::uninit(); 1];
    match SockRef::from(stream).peek(&mut probe) {
        Ok(0) => false,
        Ok(_) => true,
        Err(e) if e.kind() == ErrorKind::WouldBlock => true,
        Err(e) => {
            tracing::debug!(error = %e, "Liveness probe failed");
            false
        }
    }
}

/// Wait up to `wait` for readable data. End of file counts as no data.
pub async fn data_is_available(stream: &TcpStream, wait: Duration) -> bool {
    let mut probe = [0u8; 1];
    matches!(
        tokio::time::timeout(wait, stream.peek(&mut probe)).await,
        Ok(Ok(n)) if n > 0
    )
}
