/*

MIC-TCP is a connection-oriented message transport over UDP which trades reliability for latency
by a fixed, negotiated amount.

# Framing

Every datagram carries one PDU: a 15-byte header followed by an optional payload.

  source port (u16) | dest port (u16) | seq (u32) | ack (u32) | SYN (u8) | ACK (u8) | FIN (u8)

All fields are big-endian. During data transfer seq and ack are 0 or 1; a field which carries no
information is set to 0xFFFFFFFF. During the handshake they carry initial sequence numbers.

# Handshake

The connecting side sends SYN with its initial sequence number I and a single payload byte R, the
reliability percentage it asks for. The accepting side answers SYN+ACK with its own initial
sequence number J, ack = I + 1, and the percentage it agrees to, which is max(R, floor). The
connecting side refuses the connection unless the answer equals R, and otherwise completes the
handshake with ACK, ack = J + 1.

SYNs are retried a small number of times with a long timeout. SYN+ACKs are resent with the short
data timeout until the final ACK arrives, a duplicate SYN arrives (resent at once), or data from
the peer arrives, which implies the final ACK was lost.

The first data bit in each direction is (initial sequence + 1) mod 2.

# Stop-and-wait

One message is in flight at a time. The sender flips its bit as soon as a message is built and
waits for an ACK carrying the flipped bit, which is the bit the receiver expects next. A timeout or
an ACK with the wrong bit is a loss.

# Partial reliability

Both sides hold a loss budget over a window of the last W attempts:

  loss_distance_max = floor(W * (100 - R) / 100)    (unbounded if R = 0)

On the first loss of a message, the sender writes the message off if one more accepted loss keeps
the window within budget, and otherwise retransmits until acknowledged.

The receiver only ever delivers a message carrying the bit it expects. A mismatch is either a
retransmission whose ACK was lost or the successor of a written-off message. Within budget it is
counted as a loss, dropped, and acknowledged with the expected bit, which the sender takes as
delivery; the stream realigns on the next message. Over budget, the receiver moves its expected
bit to the mismatched one, so that the retransmission is delivered. With a budget of zero a
mismatch can only be a duplicate, which is acknowledged and dropped. Frames with a sequence
number other than 0 or 1 are dropped and acknowledged with the expected bit.

Accepted losses are counted over a sliding window, so no W consecutive attempts ever contain more
than loss_distance_max accepted losses.

# Threads

A Stack owns one transport and a table of connections. Opening a server connection starts a
dispatcher thread which receives every datagram, applies data to established connections, and
hands handshake and ACK PDUs to the connection waiting on them. Without a dispatcher, blocked
calls receive and route datagrams themselves.

*/

mod arq;
mod buffer;
mod config;
mod connection;
mod dispatch;
mod error;
pub mod frame;
mod handshake;
mod loss;
mod socket;
mod stack;
pub mod transport;

pub use config::Config;
pub use connection::{ConnectionInfo, Handle, Mode, State};
pub use error::{Error, Result};
pub use loss::loss_distance_max;
pub use socket::UdpTransport;
pub use stack::Stack;
pub use transport::{LossyTransport, MemoryTransport, Transport};
