//! Byte-exact encoding of PDUs.
//!
//! ```text
//!  0       2       4               8               12  13  14  15
//! +-------+-------+---------------+---------------+---+---+---+--------------
//! | sport | dport |    seq_num    |    ack_num    |SYN|ACK|FIN| payload ...
//! +-------+-------+---------------+---------------+---+---+---+--------------
//! ```
//!
//! Multi-byte fields are big-endian. Flag bytes are written as 0 or 1; any nonzero flag byte
//! reads as set. The payload length is implied by the frame length.

use super::{Header, Pdu};
use crate::error::{Error, Result};

pub const HEADER_SIZE: usize = 15;

pub const FRAME_SIZE_MAX: usize = 1500;
pub const PAYLOAD_SIZE_MAX: usize = FRAME_SIZE_MAX - HEADER_SIZE;

const OFF_SOURCE_PORT: usize = 0;
const OFF_DEST_PORT: usize = 2;
const OFF_SEQ_NUM: usize = 4;
const OFF_ACK_NUM: usize = 8;
const OFF_SYN: usize = 12;
const OFF_ACK: usize = 13;
const OFF_FIN: usize = 14;

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub fn write_header(buffer: &mut [u8], header: &Header) {
    debug_assert!(buffer.len() >= HEADER_SIZE);

    buffer[OFF_SOURCE_PORT..OFF_SOURCE_PORT + 2].copy_from_slice(&header.source_port.to_be_bytes());
    buffer[OFF_DEST_PORT..OFF_DEST_PORT + 2].copy_from_slice(&header.dest_port.to_be_bytes());
    buffer[OFF_SEQ_NUM..OFF_SEQ_NUM + 4].copy_from_slice(&header.seq_num.to_be_bytes());
    buffer[OFF_ACK_NUM..OFF_ACK_NUM + 4].copy_from_slice(&header.ack_num.to_be_bytes());
    buffer[OFF_SYN] = header.syn as u8;
    buffer[OFF_ACK] = header.ack as u8;
    buffer[OFF_FIN] = header.fin as u8;
}

pub fn read_header(bytes: &[u8]) -> Option<Header> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }

    Some(Header {
        source_port: read_u16(bytes, OFF_SOURCE_PORT),
        dest_port: read_u16(bytes, OFF_DEST_PORT),
        seq_num: read_u32(bytes, OFF_SEQ_NUM),
        ack_num: read_u32(bytes, OFF_ACK_NUM),
        syn: bytes[OFF_SYN] != 0,
        ack: bytes[OFF_ACK] != 0,
        fin: bytes[OFF_FIN] != 0,
    })
}

/// Serializes `pdu` into a newly allocated frame.
pub fn write(pdu: &Pdu) -> Box<[u8]> {
    let mut frame = vec![0; HEADER_SIZE + pdu.payload.len()];

    write_header(&mut frame, &pdu.header);
    frame[HEADER_SIZE..].copy_from_slice(&pdu.payload);

    frame.into_boxed_slice()
}

/// Parses a frame. Fails with [`Error::MalformedFrame`] if the frame cannot hold a header.
pub fn read(frame: &[u8]) -> Result<Pdu> {
    let header = read_header(frame).ok_or(Error::MalformedFrame { len: frame.len() })?;

    Ok(Pdu {
        header,
        payload: frame[HEADER_SIZE..].into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SEQ_UNSET;

    #[test]
    fn header_layout() {
        let pdu = Pdu {
            header: Header {
                source_port: 0x0102,
                dest_port: 0x0304,
                seq_num: 0x05060708,
                ack_num: 0x090A0B0C,
                syn: true,
                ack: false,
                fin: true,
            },
            payload: b"hi".to_vec().into_boxed_slice(),
        };

        let frame = write(&pdu);

        assert_eq!(
            &*frame,
            &[
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 1, 0, 1,
                b'h', b'i'
            ]
        );

        assert_eq!(read(&frame).unwrap(), pdu);
    }

    #[test]
    fn sentinel_is_all_ones() {
        let frame = write(&Pdu::ack(1, 2, 1));

        assert_eq!(&frame[OFF_SEQ_NUM..OFF_SEQ_NUM + 4], &[0xFF; 4]);
        assert_eq!(read_header(&frame).unwrap().seq_num, SEQ_UNSET);
    }

    #[test]
    fn header_only_frame_has_empty_payload() {
        let frame = write(&Pdu::ack(7, 8, 0));

        assert_eq!(frame.len(), HEADER_SIZE);
        assert!(read(&frame).unwrap().payload.is_empty());
    }

    #[test]
    fn short_frames_are_malformed() {
        for len in [0, 1, HEADER_SIZE - 1] {
            match read(&vec![0; len]) {
                Err(Error::MalformedFrame { len: l }) => assert_eq!(l, len),
                other => panic!("expected MalformedFrame, got {:?}", other),
            }
        }
    }

    #[test]
    fn nonzero_flag_bytes_read_as_set() {
        let mut frame = write(&Pdu::data(1, 2, 0, b""));
        frame[OFF_ACK] = 0x80;

        assert!(read_header(&frame).unwrap().ack);
    }
}
