use std::io;

use thiserror::Error;

/// Errors returned by the protocol calls on [`Stack`](crate::Stack).
#[derive(Debug, Error)]
pub enum Error {
    /// The handle is out of range or refers to a closed slot, or the operation is not valid
    /// in the record's current state.
    #[error("invalid connection handle")]
    InvalidHandle,

    /// Data transfer was requested on a connection which is not established.
    #[error("connection is not established")]
    NotEstablished,

    /// Every slot of the connection table is in use.
    #[error("no free connection slot")]
    NoFreeSlot,

    /// The handshake retry budget was exhausted.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The peer answered the reliability proposal with a different percentage.
    #[error("connection refused: proposed {proposed}% reliability, peer answered {answered}%")]
    ConnectionRefused { proposed: u8, answered: u8 },

    /// The datagram transport reported an unrecoverable error.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] io::Error),

    /// A received message was too short to hold a header.
    #[error("malformed frame ({len} bytes)")]
    MalformedFrame { len: usize },

    /// The payload does not fit in a single frame.
    #[error("payload of {len} bytes exceeds the {max} byte maximum")]
    PayloadTooLarge { len: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
