//! Hop finite-state machine types.
//!
//! A hop is stop-and-wait: it is either idle or waiting for the local
//! acknowledgment of the single packet it has in flight.
//!
//! ```text
//!          send packet
//!  IDLE ──────────────▶ AWAITING_ACK
//!   ▲                        │
//!   └──── ack / RTO fires ───┘
//! ```

use std::fmt;

/// All possible states of a [`crate::hop::Hop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HopState {
    /// Nothing in flight.
    #[default]
    Idle,
    /// One packet sent; waiting up to RTO for its local ack.
    AwaitingAck,
}

impl fmt::Display for HopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::AwaitingAck => f.write_str("awaiting-ack"),
        }
    }
}

/// Result of one send-and-wait cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Acked,
    TimedOut,
}

impl AttemptOutcome {
    pub fn is_acked(self) -> bool {
        matches!(self, Self::Acked)
    }
}
