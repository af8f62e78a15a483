use std::fmt;
use std::net;
use std::sync::{mpsc, Mutex, MutexGuard, PoisonError};
use std::time;

use crate::buffer::DeliveryBuffer;
use crate::config::Config;
use crate::frame::Pdu;
use crate::loss;

pub(crate) mod table;

/// Role a connection plays in the handshake.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Client,
    Server,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Idle,
    SynSent,
    SynReceived,
    Established,
    Closing,
    Closed,
}

/// Identifies a connection slot within a [`Stack`](crate::Stack). Slots are reused once
/// closed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Handle(pub(crate) usize);

impl Handle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of a connection's state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionInfo {
    pub state: State,
    pub mode: Mode,
    pub local_addr: net::SocketAddr,
    pub remote_addr: Option<net::SocketAddr>,
    /// Sequence bit the next outbound message will carry.
    pub send_seq: u32,
    /// Sequence bit the next inbound message is expected to carry.
    pub recv_seq: u32,
    /// Negotiated reliability percentage, once a handshake has completed.
    pub reliability: Option<u8>,
    /// Outbound messages written off within the trailing loss window.
    pub loss_distance: u32,
    /// Inbound mismatches written off within the trailing loss window.
    pub receive_loss_distance: u32,
    pub loss_distance_max: u32,
    /// Received messages not yet read.
    pub buffered: usize,
}

#[derive(Debug)]
pub(crate) struct ConnectionRecord {
    pub handle: Handle,
    pub mode: Mode,
    pub local_addr: net::SocketAddr,
    pub state: State,
    pub remote_addr: Option<net::SocketAddr>,
    // Sequence number carried by our SYN or SYN+ACK
    pub initial_seq: u32,
    // Sequence number carried by the peer's SYN or SYN+ACK
    pub peer_initial_seq: Option<u32>,
    pub send_seq: u32,
    pub recv_seq: u32,
    pub reliability: Option<u8>,
    // Set while accept() waits for a SYN
    pub listening: bool,
    pub tx_loss: loss::LossBudget,
    pub rx_loss: loss::LossBudget,
    loss_window: u32,
}

impl ConnectionRecord {
    fn new(handle: Handle, mode: Mode, local_addr: net::SocketAddr, config: &Config) -> Self {
        let initial_seq = config.initial_sequence;

        Self {
            handle,
            mode,
            local_addr,
            state: State::Idle,
            remote_addr: None,
            initial_seq,
            peer_initial_seq: None,
            send_seq: initial_seq.wrapping_add(1) % 2,
            recv_seq: 0,
            reliability: None,
            listening: false,
            tx_loss: loss::LossBudget::new(config.loss_window, 0),
            rx_loss: loss::LossBudget::new(config.loss_window, 0),
            loss_window: config.loss_window,
        }
    }

    pub fn transition(&mut self, state: State) {
        if self.state != state {
            log::debug!("{} {:?} -> {:?}", self.handle, self.state, state);
            self.state = state;
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn is_peer(&self, addr: &net::SocketAddr) -> bool {
        self.remote_addr.as_ref() == Some(addr)
    }

    /// Fixes the connection's reliability and sizes both loss budgets accordingly.
    pub fn negotiate(&mut self, reliability: u8) {
        let max = loss::loss_distance_max(reliability, self.loss_window);

        log::debug!(
            "{} reliability {}%, loss_distance_max {}",
            self.handle,
            reliability,
            max
        );

        self.reliability = Some(reliability);
        self.tx_loss.reset(max);
        self.rx_loss.reset(max);
    }

    /// Returns a record whose handshake failed to its freshly opened state, keeping its local
    /// address. A record closed in the meantime stays closed.
    pub fn reset_handshake(&mut self) {
        if self.state == State::Closed {
            return;
        }

        self.transition(State::Idle);

        self.remote_addr = None;
        self.peer_initial_seq = None;
        self.send_seq = self.initial_seq.wrapping_add(1) % 2;
        self.recv_seq = 0;
        self.reliability = None;
        self.listening = false;
        self.tx_loss.reset(0);
        self.rx_loss.reset(0);
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            state: self.state,
            mode: self.mode,
            local_addr: self.local_addr,
            remote_addr: self.remote_addr,
            send_seq: self.send_seq,
            recv_seq: self.recv_seq,
            reliability: self.reliability,
            loss_distance: self.tx_loss.loss_distance(),
            receive_loss_distance: self.rx_loss.loss_distance(),
            loss_distance_max: self.tx_loss.loss_distance_max(),
            buffered: 0,
        }
    }
}

type ControlMessage = (Pdu, net::SocketAddr);

/// A connection slot: its record, the mailbox through which the dispatcher hands it control
/// PDUs, and its delivery buffer.
#[derive(Debug)]
pub(crate) struct Connection {
    record: Mutex<ConnectionRecord>,
    control_tx: mpsc::Sender<ControlMessage>,
    control_rx: Mutex<mpsc::Receiver<ControlMessage>>,
    pub buffer: DeliveryBuffer,
}

impl Connection {
    pub fn new(handle: Handle, mode: Mode, local_addr: net::SocketAddr, config: &Config) -> Self {
        let (control_tx, control_rx) = mpsc::channel();

        Self {
            record: Mutex::new(ConnectionRecord::new(handle, mode, local_addr, config)),
            control_tx,
            control_rx: Mutex::new(control_rx),
            buffer: DeliveryBuffer::new(),
        }
    }

    pub fn record(&self) -> MutexGuard<'_, ConnectionRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn info(&self) -> ConnectionInfo {
        let mut info = self.record().info();
        info.buffered = self.buffer.len();
        info
    }

    /// Reinitializes a closed slot for a new connection.
    pub fn reset(&self, mode: Mode, local_addr: net::SocketAddr, config: &Config) {
        let mut record = self.record();
        let handle = record.handle;

        *record = ConnectionRecord::new(handle, mode, local_addr, config);

        self.drain_control();
        self.buffer.clear();
    }

    pub fn post_control(&self, pdu: Pdu, sender_addr: net::SocketAddr) {
        // The receiver lives as long as self
        let _ = self.control_tx.send((pdu, sender_addr));
    }

    fn control_rx(&self) -> MutexGuard<'_, mpsc::Receiver<ControlMessage>> {
        self.control_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn take_control(&self) -> Option<ControlMessage> {
        self.control_rx().try_recv().ok()
    }

    pub fn wait_control(&self, timeout: time::Duration) -> Option<ControlMessage> {
        self.control_rx().recv_timeout(timeout).ok()
    }

    /// Discards stale control PDUs, e.g. ACKs for a message already written off.
    pub fn drain_control(&self) {
        let rx = self.control_rx();
        while rx.try_recv().is_ok() {}
    }
}
