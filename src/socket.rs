use std::io;
use std::net;
use std::sync::{Arc, Mutex, PoisonError};
use std::time;

use crate::transport::Transport;

const SOCKET_POLLING_KEY: usize = 0;

struct SocketRx {
    // Reference to non-blocking socket
    socket: Arc<net::UdpSocket>,
    // Polling objects
    poller: polling::Poller,
    poller_events: polling::Events,
}

/// A [`Transport`] over a non-blocking UDP socket.
pub struct UdpTransport {
    // Reference to non-blocking socket
    socket: Arc<net::UdpSocket>,
    // Cached from socket initialization
    local_addr: net::SocketAddr,
    // Receive side, used by one reader at a time
    rx: Mutex<SocketRx>,
}

impl SocketRx {
    /// If a datagram can be read from the socket, returns its length and sender. Returns
    /// Ok(None) otherwise.
    fn try_read_frame(&self, buf: &mut [u8]) -> io::Result<Option<(usize, net::SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((frame_len, sender_addr)) => Ok(Some((frame_len, sender_addr))),
            Err(err) => match err.kind() {
                // WouldBlock indicates no datagram
                io::ErrorKind::WouldBlock => Ok(None),
                _ => Err(err),
            },
        }
    }

    /// Blocks for a duration of up to `timeout` for an incoming datagram. Returns Ok(None) if
    /// nothing could be read in the alloted time, or if polling awoke spuriously.
    fn wait_for_frame(
        &mut self,
        buf: &mut [u8],
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<(usize, net::SocketAddr)>> {
        // Already-queued datagrams do not generate a new readiness event
        if let Some(frame) = self.try_read_frame(buf)? {
            return Ok(Some(frame));
        }

        // Must be re-armed prior to each wait() call
        self.poller
            .modify(&*self.socket, polling::Event::readable(SOCKET_POLLING_KEY))?;

        self.poller_events.clear();

        let n = self.poller.wait(&mut self.poller_events, timeout)?;

        if n > 0 {
            self.try_read_frame(buf)
        } else {
            Ok(None)
        }
    }
}

impl UdpTransport {
    pub fn bind<A>(bind_address: A) -> io::Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        let socket = net::UdpSocket::bind(bind_address)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        let poller = polling::Poller::new()?;

        unsafe {
            poller.add(&socket, polling::Event::readable(SOCKET_POLLING_KEY))?;
        }

        let socket_rc = Arc::new(socket);

        let rx = SocketRx {
            socket: Arc::clone(&socket_rc),
            poller,
            poller_events: polling::Events::new(),
        };

        Ok(Self {
            socket: socket_rc,
            local_addr,
            rx: Mutex::new(rx),
        })
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, frame: &[u8], addr: &net::SocketAddr) -> io::Result<usize> {
        self.socket.send_to(frame, addr)
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<(usize, net::SocketAddr)>> {
        self.rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .wait_for_frame(buf, timeout)
    }

    fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        let rx = self.rx.get_mut().unwrap_or_else(PoisonError::into_inner);
        let _ = rx.poller.delete(&*rx.socket);
    }
}
