use std::net;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time;

use crate::arq;
use crate::config::Config;
use crate::connection::table::Table;
use crate::connection::{Connection, ConnectionInfo, Handle, Mode, State};
use crate::dispatch;
use crate::error::{Error, Result};
use crate::frame::{serial, Pdu};
use crate::handshake;
use crate::socket::UdpTransport;
use crate::transport::{self, Transport};

// Granularity at which blocked reads notice a closed connection
const RECV_POLL_INTERVAL: time::Duration = time::Duration::from_millis(100);

/// State shared between the foreground calls and the receive dispatcher.
pub(crate) struct Shared {
    pub config: Config,
    pub transport: Box<dyn Transport>,
    pub table: Table,
    pub dispatcher_running: AtomicBool,
    pub shutdown: AtomicBool,
}

impl Shared {
    pub fn new(transport: Box<dyn Transport>, config: Config) -> Self {
        Self {
            table: Table::new(config.connection_count_max),
            config,
            transport,
            dispatcher_running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Sends a frame. A transient transport error is treated as a lost datagram.
    pub fn transmit_frame(&self, frame: &[u8], addr: &net::SocketAddr) -> Result<()> {
        match self.transport.send_to(frame, addr) {
            Ok(_) => Ok(()),
            Err(err) if transport::is_transient(&err) => {
                log::trace!("send to {} lost: {}", addr, err);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn transmit(&self, pdu: &Pdu, addr: &net::SocketAddr) -> Result<()> {
        self.transmit_frame(&serial::write(pdu), addr)
    }
}

/// A protocol endpoint bound to one datagram transport, owning a table of connections.
///
/// Every call blocks the calling thread. Opening a [`Mode::Server`] connection starts a
/// background thread which receives datagrams for all connections until the `Stack` is
/// dropped. Without it, blocked calls receive datagrams themselves.
pub struct Stack {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Stack {
    /// Binds a UDP socket to `bind_address` with the default configuration.
    pub fn udp<A>(bind_address: A) -> Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        Self::udp_with_config(bind_address, Config::default())
    }

    pub fn udp_with_config<A>(bind_address: A, config: Config) -> Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        Ok(Self::with_transport(UdpTransport::bind(bind_address)?, config))
    }

    /// Runs the protocol over an arbitrary transport.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    pub fn with_transport<T>(transport: T, config: Config) -> Self
    where
        T: Transport + 'static,
    {
        config.validate();

        Self {
            shared: Arc::new(Shared::new(Box::new(transport), config)),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Returns the address of the underlying transport.
    pub fn local_addr(&self) -> net::SocketAddr {
        self.shared.transport.local_addr()
    }

    fn start_dispatcher(&self) -> Result<()> {
        let mut dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.shared.dispatcher_running.load(Ordering::Acquire) {
            return Ok(());
        }

        // A previous dispatcher may have stopped on a transport error
        if let Some(thread) = dispatcher.take() {
            let _ = thread.join();
        }

        self.shared.dispatcher_running.store(true, Ordering::Release);

        match dispatch::spawn(Arc::clone(&self.shared)) {
            Ok(thread) => {
                *dispatcher = Some(thread);
                Ok(())
            }
            Err(err) => {
                self.shared.dispatcher_running.store(false, Ordering::Release);
                Err(err.into())
            }
        }
    }

    fn connection(&self, handle: Handle) -> Result<Arc<Connection>> {
        self.shared.table.get(handle)
    }

    /// Allocates a connection record in the `Idle` state. Its local address is that of the
    /// transport until changed with [`bind`](Self::bind).
    pub fn open(&self, mode: Mode) -> Result<Handle> {
        self.open_with(mode, || self.start_dispatcher())
    }

    fn open_with<F>(&self, mode: Mode, start_dispatcher: F) -> Result<Handle>
    where
        F: FnOnce() -> Result<()>,
    {
        let handle = self
            .shared
            .table
            .open(mode, self.local_addr(), &self.shared.config)?;

        if mode == Mode::Server {
            if let Err(err) = start_dispatcher() {
                // Nothing could ever accept on this slot
                let _ = self.close(handle);
                return Err(err);
            }
        }

        Ok(handle)
    }

    /// Sets the local address of an idle connection. Only its port takes part in
    /// demultiplexing.
    pub fn bind(&self, handle: Handle, local_addr: net::SocketAddr) -> Result<()> {
        let conn = self.connection(handle)?;
        let mut record = conn.record();

        if record.state != State::Idle {
            return Err(Error::InvalidHandle);
        }

        record.local_addr = local_addr;

        Ok(())
    }

    /// Waits for a peer to connect, returning its address once the connection is established.
    pub fn accept(&self, handle: Handle) -> Result<net::SocketAddr> {
        let conn = self.connection(handle)?;
        handshake::accept(&self.shared, &conn)
    }

    pub fn connect(&self, handle: Handle, remote_addr: net::SocketAddr) -> Result<()> {
        let conn = self.connection(handle)?;
        handshake::connect(&self.shared, &conn, remote_addr)
    }

    /// Sends one message. Returns its length once it was acknowledged, or once its loss was
    /// accepted under the negotiated reliability.
    pub fn send(&self, handle: Handle, payload: &[u8]) -> Result<usize> {
        let conn = self.connection(handle)?;
        arq::send(&self.shared, &conn, payload)
    }

    /// Blocks until a message is available and copies it into `buf`, truncating it if `buf`
    /// is too small. Returns the number of bytes copied.
    pub fn recv(&self, handle: Handle, buf: &mut [u8]) -> Result<usize> {
        let conn = self.connection(handle)?;

        loop {
            if let Some(len) = self.recv_until(&conn, buf, None)? {
                return Ok(len);
            }
        }
    }

    /// Like [`recv`](Self::recv), but returns `Ok(None)` if nothing arrives within `timeout`.
    pub fn recv_timeout(
        &self,
        handle: Handle,
        buf: &mut [u8],
        timeout: time::Duration,
    ) -> Result<Option<usize>> {
        let conn = self.connection(handle)?;
        self.recv_until(&conn, buf, Some(time::Instant::now() + timeout))
    }

    fn recv_until(
        &self,
        conn: &Connection,
        buf: &mut [u8],
        deadline: Option<time::Instant>,
    ) -> Result<Option<usize>> {
        loop {
            if conn.record().state != State::Established {
                return Err(Error::NotEstablished);
            }

            let now = time::Instant::now();

            let wait = match deadline {
                Some(deadline) if now >= deadline => {
                    return Ok(conn.buffer.try_get(buf));
                }
                Some(deadline) => (deadline - now).min(RECV_POLL_INTERVAL),
                None => RECV_POLL_INTERVAL,
            };

            if self.shared.dispatcher_running.load(Ordering::Acquire) {
                if let Some(len) = conn.buffer.get(buf, Some(wait)) {
                    return Ok(Some(len));
                }
            } else {
                if let Some(len) = conn.buffer.try_get(buf) {
                    return Ok(Some(len));
                }

                dispatch::pump(&self.shared, wait.min(self.shared.config.ack_timeout()))?;
            }
        }
    }

    /// Closes a connection and frees its slot. No teardown is exchanged with the peer.
    pub fn close(&self, handle: Handle) -> Result<()> {
        let conn = self.connection(handle)?;
        let mut record = conn.record();

        if record.state == State::Established {
            record.transition(State::Closing);
        }

        record.listening = false;
        record.transition(State::Closed);

        Ok(())
    }

    /// Returns a snapshot of a connection's state.
    pub fn info(&self, handle: Handle) -> Result<ConnectionInfo> {
        Ok(self.connection(handle)?.info())
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);

        let dispatcher = self
            .dispatcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(thread) = dispatcher.take() {
            let _ = thread.join();
        }
    }
}
