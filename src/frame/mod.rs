pub mod serial;

/// Value of `seq_num` / `ack_num` when the field carries no meaning for a given PDU.
pub const SEQ_UNSET: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Header {
    pub source_port: u16,
    pub dest_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PduKind {
    Syn,
    SynAck,
    Ack,
    Fin,
    Data,
}

/// A protocol data unit: one header plus its payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Pdu {
    pub header: Header,
    pub payload: Box<[u8]>,
}

impl Pdu {
    pub fn data(source_port: u16, dest_port: u16, seq_num: u32, payload: &[u8]) -> Self {
        Self {
            header: Header {
                source_port,
                dest_port,
                seq_num,
                ack_num: SEQ_UNSET,
                ..Default::default()
            },
            payload: payload.into(),
        }
    }

    pub fn ack(source_port: u16, dest_port: u16, ack_num: u32) -> Self {
        Self {
            header: Header {
                source_port,
                dest_port,
                seq_num: SEQ_UNSET,
                ack_num,
                ack: true,
                ..Default::default()
            },
            payload: Box::default(),
        }
    }

    /// Handshake request carrying the initiator's sequence number and proposed reliability.
    pub fn syn(source_port: u16, dest_port: u16, seq_num: u32, reliability: u8) -> Self {
        Self {
            header: Header {
                source_port,
                dest_port,
                seq_num,
                ack_num: SEQ_UNSET,
                syn: true,
                ..Default::default()
            },
            payload: vec![reliability].into_boxed_slice(),
        }
    }

    /// Handshake response echoing the agreed reliability.
    pub fn syn_ack(
        source_port: u16,
        dest_port: u16,
        seq_num: u32,
        ack_num: u32,
        reliability: u8,
    ) -> Self {
        Self {
            header: Header {
                source_port,
                dest_port,
                seq_num,
                ack_num,
                syn: true,
                ack: true,
                ..Default::default()
            },
            payload: vec![reliability].into_boxed_slice(),
        }
    }

    pub fn kind(&self) -> PduKind {
        let header = &self.header;

        match (header.syn, header.ack, header.fin) {
            (true, true, _) => PduKind::SynAck,
            (true, false, _) => PduKind::Syn,
            (false, _, true) => PduKind::Fin,
            (false, true, false) => PduKind::Ack,
            (false, false, false) => PduKind::Data,
        }
    }

    /// Returns the reliability percentage carried by a handshake PDU, if it holds a valid one.
    pub fn reliability(&self) -> Option<u8> {
        match self.payload.first() {
            Some(&r) if r <= 100 => Some(r),
            _ => None,
        }
    }
}
