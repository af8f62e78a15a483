use std::collections::VecDeque;
use std::io;
use std::net;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time;

use super::Transport;

type DropFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

#[derive(Default)]
struct Inbox {
    frames: Mutex<VecDeque<(Box<[u8]>, net::SocketAddr)>>,
    ready: Condvar,
}

impl Inbox {
    fn lock(&self) -> MutexGuard<'_, VecDeque<(Box<[u8]>, net::SocketAddr)>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One end of an in-process datagram link.
///
/// Frames addressed to anything but the other end of the pair vanish, as they would on a
/// real network with nobody listening.
pub struct MemoryTransport {
    local_addr: net::SocketAddr,
    peer_addr: net::SocketAddr,
    inbox: Arc<Inbox>,
    peer_inbox: Arc<Inbox>,
    // Returns true for each outbound frame which should be discarded
    drop_filter: Mutex<Option<DropFilter>>,
    frames_sent: AtomicUsize,
    frames_dropped: AtomicUsize,
}

impl MemoryTransport {
    /// Creates two connected ends, bound to `a` and `b` respectively.
    pub fn pair(a: net::SocketAddr, b: net::SocketAddr) -> (Self, Self) {
        let inbox_a = Arc::new(Inbox::default());
        let inbox_b = Arc::new(Inbox::default());

        let end = |local_addr, peer_addr, inbox: Arc<Inbox>, peer_inbox: Arc<Inbox>| Self {
            local_addr,
            peer_addr,
            inbox,
            peer_inbox,
            drop_filter: Mutex::new(None),
            frames_sent: AtomicUsize::new(0),
            frames_dropped: AtomicUsize::new(0),
        };

        (
            end(a, b, Arc::clone(&inbox_a), Arc::clone(&inbox_b)),
            end(b, a, inbox_b, inbox_a),
        )
    }

    /// Installs a predicate over outbound frames; frames for which it returns true are
    /// discarded.
    pub fn set_drop_filter<F>(&self, filter: F)
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        *self.filter() = Some(Box::new(filter));
    }

    pub fn clear_drop_filter(&self) {
        *self.filter() = None;
    }

    /// Number of frames passed to `send_to`, including dropped ones.
    pub fn frames_sent(&self) -> usize {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Number of frames discarded by the drop filter.
    pub fn frames_dropped(&self) -> usize {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn peer_addr(&self) -> net::SocketAddr {
        self.peer_addr
    }

    fn filter(&self) -> MutexGuard<'_, Option<DropFilter>> {
        self.drop_filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryTransport {
    fn send_to(&self, frame: &[u8], addr: &net::SocketAddr) -> io::Result<usize> {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);

        let discard = match self.filter().as_mut() {
            Some(filter) => filter(frame),
            None => false,
        };

        if discard {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(frame.len());
        }

        if *addr == self.peer_addr {
            self.peer_inbox
                .lock()
                .push_back((frame.into(), self.local_addr));
            self.peer_inbox.ready.notify_all();
        }

        Ok(frame.len())
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<(usize, net::SocketAddr)>> {
        let deadline = timeout.map(|timeout| time::Instant::now() + timeout);
        let mut frames = self.inbox.lock();

        loop {
            if let Some((frame, from)) = frames.pop_front() {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                return Ok(Some((len, from)));
            }

            frames = match deadline {
                None => self
                    .inbox
                    .ready
                    .wait(frames)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = time::Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }

                    self.inbox
                        .ready
                        .wait_timeout(frames, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }
}
