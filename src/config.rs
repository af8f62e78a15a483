use std::time;

use super::frame;

const CONNECTION_COUNT_MAX_DEFAULT: usize = 8;
const CONNECTION_COUNT_MAX_MAX: usize = 65536;

const INITIAL_SEQUENCE_DEFAULT: u32 = 0;

const ACK_TIMEOUT_DEFAULT_MS: u64 = 100;
const ACK_TIMEOUT_MIN_MS: u64 = 1;

const HANDSHAKE_TIMEOUT_DEFAULT_MS: u64 = 1_000;
const HANDSHAKE_TIMEOUT_MIN_MS: u64 = 10;

const HANDSHAKE_RETRIES_DEFAULT: u32 = 5;

const LOSS_WINDOW_DEFAULT: u32 = 30;

const RELIABILITY_DEFAULT: u8 = 100;
const RELIABILITY_FLOOR_DEFAULT: u8 = 0;

/// Configuration for a [`Stack`](crate::Stack) object.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of connection records which may be allocated at any given time.
    ///
    /// Minimum value: 1 \
    /// Maximum value: 65,536 \
    /// Default value: 8
    pub connection_count_max: usize,

    /// Sequence number carried by the SYN (client) or SYN+ACK (server) of every handshake.
    /// The first data bit in each direction is `(initial_sequence + 1) mod 2`.
    ///
    /// Must not be `u32::MAX`, which is reserved as the unset sentinel. \
    /// Default value: 0
    pub initial_sequence: u32,

    /// Time to wait for the acknowledgment of a data frame, in milliseconds. Also used between
    /// SYN+ACK resends while a server waits for the final handshake ACK.
    ///
    /// Minimum value: 1 \
    /// Default value: 100
    pub ack_timeout_ms: u64,

    /// Time to wait for a handshake response before resending, in milliseconds.
    ///
    /// Minimum value: 10 \
    /// Default value: 1,000
    pub handshake_timeout_ms: u64,

    /// Number of SYN transmissions attempted by `connect`. `accept` waits for up to
    /// `handshake_timeout_ms * handshake_retries` in each of its phases.
    ///
    /// Minimum value: 1 \
    /// Default value: 5
    pub handshake_retries: u32,

    /// Number of consecutive send attempts (the window `W`) over which the loss budget is
    /// evaluated.
    ///
    /// Minimum value: 1 \
    /// Default value: 30
    pub loss_window: u32,

    /// Reliability percentage proposed by `connect`. 100 tolerates no loss at all, 0 tolerates
    /// any amount of loss.
    ///
    /// Maximum value: 100 \
    /// Default value: 100
    pub reliability: u8,

    /// Lowest reliability percentage `accept` agrees to. Proposals below the floor are answered
    /// with the floor, which the connecting side refuses.
    ///
    /// Maximum value: 100 \
    /// Default value: 0
    pub reliability_floor: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection_count_max: CONNECTION_COUNT_MAX_DEFAULT,
            initial_sequence: INITIAL_SEQUENCE_DEFAULT,
            ack_timeout_ms: ACK_TIMEOUT_DEFAULT_MS,
            handshake_timeout_ms: HANDSHAKE_TIMEOUT_DEFAULT_MS,
            handshake_retries: HANDSHAKE_RETRIES_DEFAULT,
            loss_window: LOSS_WINDOW_DEFAULT,
            reliability: RELIABILITY_DEFAULT,
            reliability_floor: RELIABILITY_FLOOR_DEFAULT,
        }
    }
}

impl Config {
    pub(crate) fn validate(&self) {
        assert!(
            self.connection_count_max > 0,
            "invalid configuration: connection_count_max == 0"
        );
        assert!(
            self.connection_count_max <= CONNECTION_COUNT_MAX_MAX,
            "invalid configuration: connection_count_max > {}",
            CONNECTION_COUNT_MAX_MAX
        );
        assert!(
            self.initial_sequence != frame::SEQ_UNSET,
            "invalid configuration: initial_sequence is the unset sentinel"
        );
        assert!(
            self.ack_timeout_ms >= ACK_TIMEOUT_MIN_MS,
            "invalid configuration: ack_timeout_ms < {}",
            ACK_TIMEOUT_MIN_MS
        );
        assert!(
            self.handshake_timeout_ms >= HANDSHAKE_TIMEOUT_MIN_MS,
            "invalid configuration: handshake_timeout_ms < {}",
            HANDSHAKE_TIMEOUT_MIN_MS
        );
        assert!(
            self.handshake_retries > 0,
            "invalid configuration: handshake_retries == 0"
        );
        assert!(
            self.loss_window > 0,
            "invalid configuration: loss_window == 0"
        );
        assert!(
            self.reliability <= 100,
            "invalid configuration: reliability > 100"
        );
        assert!(
            self.reliability_floor <= 100,
            "invalid configuration: reliability_floor > 100"
        );
    }

    pub fn ack_timeout(&self) -> time::Duration {
        time::Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> time::Duration {
        time::Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Total time `accept` waits in each handshake phase.
    pub fn handshake_budget(&self) -> time::Duration {
        self.handshake_timeout() * self.handshake_retries
    }
}
