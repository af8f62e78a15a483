use std::io;
use std::net;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time;

use crate::arq;
use crate::connection::{Connection, State};
use crate::error::Result;
use crate::frame::{serial, Pdu, PduKind};
use crate::handshake;
use crate::stack::Shared;
use crate::transport;

// How often the dispatcher checks for shutdown while the transport is idle
const POLL_INTERVAL: time::Duration = time::Duration::from_millis(50);

pub(crate) fn spawn(shared: Arc<Shared>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("mictcp-dispatch".into())
        .spawn(move || run(&shared))
}

fn run(shared: &Shared) {
    log::debug!("dispatcher started on {}", shared.transport.local_addr());

    let mut buf = [0; serial::FRAME_SIZE_MAX];

    while !shared.shutdown.load(Ordering::Acquire) {
        let result = match shared.transport.recv_from(&mut buf, Some(POLL_INTERVAL)) {
            Ok(Some((len, sender_addr))) => handle_frame(shared, &buf[..len], sender_addr),
            Ok(None) => Ok(()),
            Err(err) if transport::is_transient(&err) => Ok(()),
            Err(err) => Err(err.into()),
        };

        if let Err(err) = result {
            log::error!("dispatcher stopping: {}", err);
            break;
        }
    }

    shared.dispatcher_running.store(false, Ordering::Release);

    log::debug!("dispatcher stopped");
}

/// Decodes one datagram and routes it. Malformed frames are dropped.
pub(crate) fn handle_frame(
    shared: &Shared,
    frame: &[u8],
    sender_addr: net::SocketAddr,
) -> Result<()> {
    match serial::read(frame) {
        Ok(pdu) => route(shared, pdu, sender_addr),
        Err(err) => {
            log::debug!("dropping frame from {}: {}", sender_addr, err);
            Ok(())
        }
    }
}

fn route(shared: &Shared, pdu: Pdu, sender_addr: net::SocketAddr) -> Result<()> {
    let port = pdu.header.dest_port;
    let kind = pdu.kind();

    let conn = shared.table.find(|record| {
        record.local_port() == port
            && record.is_peer(&sender_addr)
            && matches!(
                record.state,
                State::SynSent | State::SynReceived | State::Established
            )
    });

    let conn = match conn {
        Some(conn) => conn,
        None => {
            let listener = (kind == PduKind::Syn)
                .then(|| {
                    shared.table.find(|record| {
                        record.local_port() == port && record.listening && record.state == State::Idle
                    })
                })
                .flatten();

            match listener {
                Some(conn) => conn.post_control(pdu, sender_addr),
                None => log::trace!("no connection for {:?} from {} to port {}", kind, sender_addr, port),
            }

            return Ok(());
        }
    };

    let state = conn.record().state;

    match (state, kind) {
        (State::Established, PduKind::Data) => {
            arq::process_inbound(shared, &conn, &pdu, sender_addr)
        }
        (State::Established, PduKind::SynAck) => {
            handshake::reack(shared, &conn, &pdu, sender_addr)
        }
        (State::Established, PduKind::Syn) | (_, PduKind::Fin) => {
            log::debug!("{} ignoring {:?} from {}", conn.record().handle, kind, sender_addr);
            Ok(())
        }
        _ => {
            conn.post_control(pdu, sender_addr);
            Ok(())
        }
    }
}

/// Receives and routes at most one datagram, waiting up to `timeout`. Used by foreground calls
/// when no dispatcher thread is running.
pub(crate) fn pump(shared: &Shared, timeout: time::Duration) -> Result<()> {
    let mut buf = [0; serial::FRAME_SIZE_MAX];

    match shared.transport.recv_from(&mut buf, Some(timeout)) {
        Ok(Some((len, sender_addr))) => handle_frame(shared, &buf[..len], sender_addr),
        Ok(None) => Ok(()),
        Err(err) if transport::is_transient(&err) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Waits up to `timeout` for a control PDU addressed to `conn`.
pub(crate) fn wait_control(
    shared: &Shared,
    conn: &Connection,
    timeout: time::Duration,
) -> Result<Option<(Pdu, net::SocketAddr)>> {
    if shared.dispatcher_running.load(Ordering::Acquire) {
        return Ok(conn.wait_control(timeout));
    }

    let deadline = time::Instant::now() + timeout;

    loop {
        if let Some(message) = conn.take_control() {
            return Ok(Some(message));
        }

        let now = time::Instant::now();
        if now >= deadline {
            return Ok(None);
        }

        pump(shared, deadline - now)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::Config;
    use crate::connection::Mode;
    use crate::error::Error;
    use crate::transport::{MemoryTransport, Transport};

    const LOCAL_ADDR: &str = "127.0.0.1:6000";
    const PEER_ADDR: &str = "127.0.0.1:6001";

    fn addr(s: &str) -> net::SocketAddr {
        s.parse().unwrap()
    }

    fn established(shared: &Shared, local_addr: &str, remote_addr: &str) -> Arc<Connection> {
        let handle = shared
            .table
            .open(Mode::Server, addr(local_addr), &shared.config)
            .unwrap();
        let conn = shared.table.get(handle).unwrap();

        {
            let mut record = conn.record();
            record.remote_addr = Some(addr(remote_addr));
            record.negotiate(100);
            record.recv_seq = 1;
            record.transition(State::Established);
        }

        conn
    }

    fn delivered(conn: &Connection) -> Vec<Vec<u8>> {
        let mut buf = [0; 64];
        let mut out = Vec::new();

        while let Some(len) = conn.buffer.try_get(&mut buf) {
            out.push(buf[..len].to_vec());
        }

        out
    }

    /// A transport whose every operation fails with a non-transient error.
    struct BrokenTransport;

    impl Transport for BrokenTransport {
        fn send_to(&self, _frame: &[u8], _addr: &net::SocketAddr) -> io::Result<usize> {
            Err(io::ErrorKind::PermissionDenied.into())
        }

        fn recv_from(
            &self,
            _buf: &mut [u8],
            _timeout: Option<time::Duration>,
        ) -> io::Result<Option<(usize, net::SocketAddr)>> {
            Err(io::ErrorKind::PermissionDenied.into())
        }

        fn local_addr(&self) -> net::SocketAddr {
            addr(LOCAL_ADDR)
        }
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let (local, peer) = MemoryTransport::pair(addr(LOCAL_ADDR), addr(PEER_ADDR));
        let shared = Shared::new(Box::new(local), Config::default());
        let conn = established(&shared, LOCAL_ADDR, PEER_ADDR);

        for len in [0, 1, serial::HEADER_SIZE - 1] {
            peer.send_to(&vec![0xAB; len], &addr(LOCAL_ADDR)).unwrap();
            pump(&shared, time::Duration::from_millis(10)).unwrap();
        }

        assert!(delivered(&conn).is_empty());
        assert_eq!(conn.record().state, State::Established);

        // The connection carries on as before
        let frame = serial::write(&Pdu::data(6001, 6000, 1, b"after"));
        peer.send_to(&frame, &addr(LOCAL_ADDR)).unwrap();
        pump(&shared, time::Duration::from_millis(10)).unwrap();

        assert_eq!(delivered(&conn), vec![b"after".to_vec()]);

        let mut buf = [0; serial::FRAME_SIZE_MAX];
        let (len, _) = peer
            .recv_from(&mut buf, Some(time::Duration::ZERO))
            .unwrap()
            .unwrap();
        let ack = serial::read(&buf[..len]).unwrap();
        assert_eq!((ack.kind(), ack.header.ack_num), (PduKind::Ack, 0));
    }

    #[test]
    fn frames_demultiplexed_by_port_and_sender() {
        let (local, _peer) = MemoryTransport::pair(addr(LOCAL_ADDR), addr(PEER_ADDR));
        let shared = Shared::new(Box::new(local), Config::default());

        let a = established(&shared, "127.0.0.1:6000", "127.0.0.1:7000");
        let b = established(&shared, "127.0.0.1:6002", "127.0.0.1:7000");
        let c = established(&shared, "127.0.0.1:6000", "127.0.0.1:7001");

        let send = |source: &str, dest_port: u16, payload: &[u8]| {
            let source = addr(source);
            let frame = serial::write(&Pdu::data(source.port(), dest_port, 1, payload));
            handle_frame(&shared, &frame, source).unwrap();
        };

        send("127.0.0.1:7000", 6000, b"a");
        send("127.0.0.1:7000", 6002, b"b");
        send("127.0.0.1:7001", 6000, b"c");

        // Unknown sender, and unknown port
        send("127.0.0.1:7002", 6000, b"x");
        send("127.0.0.1:7000", 6003, b"y");

        assert_eq!(delivered(&a), vec![b"a".to_vec()]);
        assert_eq!(delivered(&b), vec![b"b".to_vec()]);
        assert_eq!(delivered(&c), vec![b"c".to_vec()]);
    }

    #[test]
    fn syn_reaches_listener_on_its_port() {
        let (local, _peer) = MemoryTransport::pair(addr(LOCAL_ADDR), addr(PEER_ADDR));
        let shared = Shared::new(Box::new(local), Config::default());

        let handle = shared
            .table
            .open(Mode::Server, addr("127.0.0.1:6005"), &shared.config)
            .unwrap();
        let listener = shared.table.get(handle).unwrap();
        listener.record().listening = true;

        let sender = addr("127.0.0.1:7000");

        let syn = serial::write(&Pdu::syn(7000, 6006, 0, 100));
        handle_frame(&shared, &syn, sender).unwrap();
        assert!(listener.take_control().is_none());

        let syn = serial::write(&Pdu::syn(7000, 6005, 0, 100));
        handle_frame(&shared, &syn, sender).unwrap();

        let (pdu, from) = listener.take_control().unwrap();
        assert_eq!((pdu.kind(), from), (PduKind::Syn, sender));

        // Only SYNs reach a listener
        let data = serial::write(&Pdu::data(7000, 6005, 0, b"early"));
        handle_frame(&shared, &data, sender).unwrap();
        assert!(listener.take_control().is_none());
    }

    #[test]
    fn fatal_transport_error_stops_dispatcher() {
        let shared = Arc::new(Shared::new(Box::new(BrokenTransport), Config::default()));
        let conn = established(&shared, LOCAL_ADDR, PEER_ADDR);

        shared.dispatcher_running.store(true, Ordering::Release);

        let dispatcher = spawn(Arc::clone(&shared)).unwrap();
        dispatcher.join().unwrap();

        assert!(!shared.dispatcher_running.load(Ordering::Acquire));

        // Foreground calls see the same failure
        assert!(matches!(
            arq::send(&shared, &conn, b"x"),
            Err(Error::TransportFailure(_))
        ));
        assert!(matches!(
            pump(&shared, time::Duration::from_millis(10)),
            Err(Error::TransportFailure(_))
        ));
    }
}
