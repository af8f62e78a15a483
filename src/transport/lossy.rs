use std::io;
use std::net;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Transport;

/// Wraps another transport and silently discards a percentage of outbound datagrams.
pub struct LossyTransport<T> {
    inner: T,
    // Percentage of sends to discard, 0..=100
    loss_rate: AtomicU8,
    rng: Mutex<StdRng>,
}

impl<T: Transport> LossyTransport<T> {
    pub fn new(inner: T, loss_rate: u8) -> Self {
        Self::with_rng(inner, loss_rate, StdRng::from_entropy())
    }

    /// Uses a fixed seed, so that the same sequence of sends sees the same drops.
    pub fn with_seed(inner: T, loss_rate: u8, seed: u64) -> Self {
        Self::with_rng(inner, loss_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(inner: T, loss_rate: u8, rng: StdRng) -> Self {
        assert!(loss_rate <= 100, "loss rate > 100");

        Self {
            inner,
            loss_rate: AtomicU8::new(loss_rate),
            rng: Mutex::new(rng),
        }
    }

    pub fn set_loss_rate(&self, loss_rate: u8) {
        assert!(loss_rate <= 100, "loss rate > 100");
        self.loss_rate.store(loss_rate, Ordering::Relaxed);
    }

    pub fn loss_rate(&self) -> u8 {
        self.loss_rate.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn should_drop(&self) -> bool {
        let loss_rate = self.loss_rate();

        if loss_rate == 0 {
            return false;
        }

        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(0..100) < loss_rate
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    fn send_to(&self, frame: &[u8], addr: &net::SocketAddr) -> io::Result<usize> {
        if self.should_drop() {
            log::debug!("dropping {} byte frame to {}", frame.len(), addr);
            return Ok(frame.len());
        }

        self.inner.send_to(frame, addr)
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<(usize, net::SocketAddr)>> {
        self.inner.recv_from(buf, timeout)
    }

    fn local_addr(&self) -> net::SocketAddr {
        self.inner.local_addr()
    }
}
