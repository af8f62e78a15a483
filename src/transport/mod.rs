//! The datagram boundary the protocol runs over.

use std::io;
use std::net;
use std::sync::Arc;
use std::time;

mod lossy;
mod memory;

pub use lossy::LossyTransport;
pub use memory::MemoryTransport;

/// An unreliable, unordered, message-oriented transport.
///
/// Implementations must be usable from several threads at once: the receive dispatcher reads
/// while foreground calls write.
pub trait Transport: Send + Sync {
    /// Sends one datagram to `addr`, returning the number of bytes written.
    fn send_to(&self, frame: &[u8], addr: &net::SocketAddr) -> io::Result<usize>;

    /// Waits up to `timeout` (forever if `None`) for one datagram. Returns `Ok(None)` if
    /// nothing arrived in time. Datagrams larger than `buf` are truncated.
    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<(usize, net::SocketAddr)>>;

    fn local_addr(&self) -> net::SocketAddr;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send_to(&self, frame: &[u8], addr: &net::SocketAddr) -> io::Result<usize> {
        (**self).send_to(frame, addr)
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<(usize, net::SocketAddr)>> {
        (**self).recv_from(buf, timeout)
    }

    fn local_addr(&self) -> net::SocketAddr {
        (**self).local_addr()
    }
}

/// Errors which amount to a lost datagram rather than a broken transport.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(is_transient(&io::ErrorKind::WouldBlock.into()));
        assert!(is_transient(&io::ErrorKind::ConnectionRefused.into()));
        assert!(!is_transient(&io::ErrorKind::PermissionDenied.into()));
        assert!(!is_transient(&io::ErrorKind::AddrNotAvailable.into()));
    }
}
