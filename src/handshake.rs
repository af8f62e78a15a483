//! Three-way handshake with reliability negotiation.
//!
//! The connecting side proposes a reliability percentage in its SYN. The accepting side echoes
//! the percentage it agrees to (never less than its configured floor) in the SYN+ACK, and the
//! connecting side refuses the connection unless the echo matches its proposal.

use std::net;
use std::time;

use crate::arq;
use crate::connection::{Connection, State};
use crate::dispatch;
use crate::error::{Error, Result};
use crate::frame::{serial, Pdu, PduKind};
use crate::stack::Shared;

// Longest single wait, bounding how long a close from another thread goes unnoticed
const CLOSE_CHECK_INTERVAL: time::Duration = time::Duration::from_millis(50);

fn first_data_seq(initial_seq: u32) -> u32 {
    initial_seq.wrapping_add(1) % 2
}

fn ensure_open(conn: &Connection) -> Result<()> {
    if conn.record().state == State::Closed {
        log::debug!("handshake abandoned, connection closed");
        return Err(Error::InvalidHandle);
    }

    Ok(())
}

fn wait_control(
    shared: &Shared,
    conn: &Connection,
    timeout: time::Duration,
) -> Result<Option<(Pdu, net::SocketAddr)>> {
    ensure_open(conn)?;
    dispatch::wait_control(shared, conn, timeout.min(CLOSE_CHECK_INTERVAL))
}

pub(crate) fn connect(shared: &Shared, conn: &Connection, remote_addr: net::SocketAddr) -> Result<()> {
    let (syn, initial_seq) = {
        let mut record = conn.record();

        if record.state != State::Idle {
            return Err(Error::InvalidHandle);
        }

        record.remote_addr = Some(remote_addr);
        record.transition(State::SynSent);

        let syn = Pdu::syn(
            record.local_port(),
            remote_addr.port(),
            record.initial_seq,
            shared.config.reliability,
        );

        (syn, record.initial_seq)
    };

    conn.drain_control();

    let result = run_connect(shared, conn, remote_addr, &syn, initial_seq);

    if result.is_err() {
        conn.record().reset_handshake();
    }

    result
}

fn run_connect(
    shared: &Shared,
    conn: &Connection,
    remote_addr: net::SocketAddr,
    syn: &Pdu,
    initial_seq: u32,
) -> Result<()> {
    let proposed = shared.config.reliability;
    let frame = serial::write(syn);

    for attempt in 1..=shared.config.handshake_retries {
        log::debug!("SYN to {} (attempt {})", remote_addr, attempt);

        shared.transmit_frame(&frame, &remote_addr)?;

        let deadline = time::Instant::now() + shared.config.handshake_timeout();

        loop {
            let remaining = deadline.saturating_duration_since(time::Instant::now());

            if remaining.is_zero() {
                break;
            }

            let (pdu, sender_addr) = match wait_control(shared, conn, remaining)? {
                Some(message) => message,
                None => continue,
            };

            if sender_addr != remote_addr
                || pdu.kind() != PduKind::SynAck
                || pdu.header.ack_num != initial_seq.wrapping_add(1)
            {
                log::trace!("ignoring {:?} from {}", pdu.kind(), sender_addr);
                continue;
            }

            let answered = match pdu.reliability() {
                Some(reliability) => reliability,
                None => continue,
            };

            if answered != proposed {
                log::warn!(
                    "{} refused: proposed {}%, answered {}%",
                    remote_addr,
                    proposed,
                    answered
                );
                return Err(Error::ConnectionRefused { proposed, answered });
            }

            let peer_initial_seq = pdu.header.seq_num;

            let ack = {
                let mut record = conn.record();

                if record.state == State::Closed {
                    return Err(Error::InvalidHandle);
                }

                record.negotiate(answered);
                record.peer_initial_seq = Some(peer_initial_seq);
                record.send_seq = first_data_seq(initial_seq);
                record.recv_seq = first_data_seq(peer_initial_seq);
                record.transition(State::Established);

                Pdu::ack(
                    record.local_port(),
                    remote_addr.port(),
                    peer_initial_seq.wrapping_add(1),
                )
            };

            shared.transmit(&ack, &remote_addr)?;

            return Ok(());
        }
    }

    log::debug!("no answer from {}", remote_addr);

    Err(Error::HandshakeTimeout)
}

pub(crate) fn accept(shared: &Shared, conn: &Connection) -> Result<net::SocketAddr> {
    {
        let mut record = conn.record();

        if record.state != State::Idle {
            return Err(Error::InvalidHandle);
        }

        record.listening = true;
    }

    conn.drain_control();

    let result = run_accept(shared, conn);

    if result.is_err() {
        conn.record().reset_handshake();
    }

    result
}

fn run_accept(shared: &Shared, conn: &Connection) -> Result<net::SocketAddr> {
    let budget = shared.config.handshake_budget();
    let ack_timeout = shared.config.ack_timeout();

    let deadline = time::Instant::now() + budget;

    let (syn, remote_addr, proposed) = loop {
        let remaining = deadline.saturating_duration_since(time::Instant::now());

        if remaining.is_zero() {
            return Err(Error::HandshakeTimeout);
        }

        if let Some((pdu, sender_addr)) = wait_control(shared, conn, remaining)? {
            match (pdu.kind(), pdu.reliability()) {
                (PduKind::Syn, Some(proposed)) => break (pdu, sender_addr, proposed),
                (kind, _) => log::trace!("ignoring {:?} from {}", kind, sender_addr),
            }
        }
    };

    let agreed = proposed.max(shared.config.reliability_floor);

    if agreed != proposed {
        log::warn!(
            "{} proposed {}%, answering with floor {}%",
            remote_addr,
            proposed,
            agreed
        );
    }

    let (frame, initial_seq) = {
        let mut record = conn.record();

        if record.state == State::Closed {
            return Err(Error::InvalidHandle);
        }

        record.listening = false;
        record.remote_addr = Some(remote_addr);
        record.peer_initial_seq = Some(syn.header.seq_num);
        record.recv_seq = first_data_seq(syn.header.seq_num);
        record.negotiate(agreed);
        record.transition(State::SynReceived);

        let syn_ack = Pdu::syn_ack(
            record.local_port(),
            remote_addr.port(),
            record.initial_seq,
            syn.header.seq_num.wrapping_add(1),
            agreed,
        );

        (serial::write(&syn_ack), record.initial_seq)
    };

    let deadline = time::Instant::now() + budget;

    shared.transmit_frame(&frame, &remote_addr)?;
    let mut resend_time = time::Instant::now() + ack_timeout;

    loop {
        let now = time::Instant::now();

        if now >= deadline {
            log::debug!("no final ACK from {}", remote_addr);
            return Err(Error::HandshakeTimeout);
        }

        if now >= resend_time {
            log::trace!("resending SYN+ACK to {}", remote_addr);
            shared.transmit_frame(&frame, &remote_addr)?;
            resend_time = now + ack_timeout;
        }

        let wait = resend_time.min(deadline) - now;

        let (pdu, sender_addr) = match wait_control(shared, conn, wait)? {
            Some(message) => message,
            None => continue,
        };

        if sender_addr != remote_addr {
            continue;
        }

        match pdu.kind() {
            PduKind::Ack if pdu.header.ack_num == initial_seq.wrapping_add(1) => {
                establish(conn, initial_seq)?;
                return Ok(remote_addr);
            }
            PduKind::Data => {
                // The final ACK was lost, but the peer is already sending
                log::debug!("data from {} before final ACK", remote_addr);
                establish(conn, initial_seq)?;
                arq::process_inbound(shared, conn, &pdu, remote_addr)?;
                return Ok(remote_addr);
            }
            PduKind::Syn => {
                log::debug!("duplicate SYN from {}", remote_addr);
                shared.transmit_frame(&frame, &remote_addr)?;
                resend_time = time::Instant::now() + ack_timeout;
            }
            kind => log::trace!("ignoring {:?} from {}", kind, remote_addr),
        }
    }
}

fn establish(conn: &Connection, initial_seq: u32) -> Result<()> {
    let mut record = conn.record();

    if record.state == State::Closed {
        return Err(Error::InvalidHandle);
    }

    record.send_seq = first_data_seq(initial_seq);
    record.transition(State::Established);

    Ok(())
}

/// Answers a duplicate SYN+ACK on an established connection, whose final ACK must have been
/// lost, by sending the final ACK again.
pub(crate) fn reack(
    shared: &Shared,
    conn: &Connection,
    pdu: &Pdu,
    sender_addr: net::SocketAddr,
) -> Result<()> {
    let ack = {
        let record = conn.record();

        if record.peer_initial_seq != Some(pdu.header.seq_num) {
            return Ok(());
        }

        log::debug!("{} repeating final ACK to {}", record.handle, sender_addr);

        Pdu::ack(
            record.local_port(),
            sender_addr.port(),
            pdu.header.seq_num.wrapping_add(1),
        )
    };

    shared.transmit(&ack, &sender_addr)
}
