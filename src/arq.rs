//! Stop-and-wait retransmission over a one-bit sequence space, with a loss budget deciding
//! which losses may go unrepaired.

use std::net;
use std::time;

use crate::connection::{Connection, State};
use crate::dispatch;
use crate::error::{Error, Result};
use crate::frame::{serial, Pdu, PduKind};
use crate::stack::Shared;

fn next_seq(seq: u32) -> u32 {
    (seq + 1) % 2
}

/// Sends one message, returning once it is acknowledged or written off.
pub(crate) fn send(shared: &Shared, conn: &Connection, payload: &[u8]) -> Result<usize> {
    if payload.len() > serial::PAYLOAD_SIZE_MAX {
        return Err(Error::PayloadTooLarge {
            len: payload.len(),
            max: serial::PAYLOAD_SIZE_MAX,
        });
    }

    let (frame, remote_addr, expected_ack, handle) = {
        let mut record = conn.record();

        if record.state != State::Established {
            return Err(Error::NotEstablished);
        }

        let remote_addr = record.remote_addr.ok_or(Error::NotEstablished)?;

        let pdu = Pdu::data(
            record.local_port(),
            remote_addr.port(),
            record.send_seq,
            payload,
        );

        record.send_seq = next_seq(record.send_seq);

        (serial::write(&pdu), remote_addr, record.send_seq, record.handle)
    };

    // Anything queued now answers a previous message
    conn.drain_control();

    let ack_timeout = shared.config.ack_timeout();
    let mut first_loss = true;

    loop {
        shared.transmit_frame(&frame, &remote_addr)?;

        if await_ack(shared, conn, remote_addr, expected_ack, ack_timeout)? {
            conn.record().tx_loss.record_delivered();
            log::trace!("{} message acknowledged ({})", handle, expected_ack);
            return Ok(payload.len());
        }

        if first_loss {
            first_loss = false;

            let mut record = conn.record();

            if record.tx_loss.admit_loss() {
                log::debug!(
                    "{} message written off, loss_distance {}/{}",
                    handle,
                    record.tx_loss.loss_distance(),
                    record.tx_loss.loss_distance_max()
                );
                return Ok(payload.len());
            }

            log::debug!("{} loss budget exhausted, retransmitting", handle);
        }

        if conn.record().state != State::Established {
            return Err(Error::NotEstablished);
        }

        log::trace!("{} retransmitting", handle);
    }
}

/// Returns true if a matching acknowledgment arrives within `timeout`. A mismatched
/// acknowledgment counts as a loss.
fn await_ack(
    shared: &Shared,
    conn: &Connection,
    remote_addr: net::SocketAddr,
    expected_ack: u32,
    timeout: time::Duration,
) -> Result<bool> {
    let deadline = time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(time::Instant::now());

        if remaining.is_zero() {
            return Ok(false);
        }

        let (pdu, sender_addr) = match dispatch::wait_control(shared, conn, remaining)? {
            Some(message) => message,
            None => return Ok(false),
        };

        if sender_addr != remote_addr || pdu.kind() != PduKind::Ack {
            continue;
        }

        return Ok(pdu.header.ack_num == expected_ack);
    }
}

/// Applies an inbound data PDU to an established connection and acknowledges it.
pub(crate) fn process_inbound(
    shared: &Shared,
    conn: &Connection,
    pdu: &Pdu,
    sender_addr: net::SocketAddr,
) -> Result<()> {
    let seq = pdu.header.seq_num;

    let ack = {
        let mut record = conn.record();

        if record.state != State::Established {
            return Ok(());
        }

        let handle = record.handle;

        if seq > 1 {
            // Payload is dropped, but the sender still learns which bit we expect
            log::trace!("{} dropping data frame with sequence {}", handle, seq);
        } else if seq == record.recv_seq {
            conn.buffer.put(&pdu.payload);
            record.recv_seq = next_seq(seq);
            record.rx_loss.record_delivered();
        } else if record.rx_loss.loss_distance_max() == 0 {
            // Our last ACK was lost and this is a retransmission
            log::trace!("{} duplicate message ({})", handle, seq);
        } else if record.rx_loss.admit_loss() {
            // A retransmission after a lost ACK, or the successor of a message the sender wrote
            // off. Neither is delivered.
            log::debug!(
                "{} ignoring mismatched message ({}), loss_distance {}/{}",
                handle,
                seq,
                record.rx_loss.loss_distance(),
                record.rx_loss.loss_distance_max()
            );
        } else {
            log::debug!("{} loss budget exhausted, awaiting retransmission", handle);
            record.recv_seq = seq;
            record.rx_loss.record_delivered();
        }

        Pdu::ack(record.local_port(), sender_addr.port(), record.recv_seq)
    };

    shared.transmit(&ack, &sender_addr)
}
