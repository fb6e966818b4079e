//! Crate-wide error type.
//!
//! Only [`TransferError::Transport`], [`TransferError::Source`],
//! [`TransferError::Sink`] and the setup variants ever terminate a loop.
//! Timeouts and malformed datagrams are ordinary control flow inside the
//! roles: they surface as a missed acknowledgment and trigger a retransmit.

use thiserror::Error;

use crate::config::ConfigError;
use crate::packet::PacketError;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The underlying UDP socket failed. Not retried.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Reading the source stream failed.
    #[error("source stream error: {0}")]
    Source(#[source] std::io::Error),

    /// Opening, writing or closing the output stream failed.
    #[error("output stream error: {0}")]
    Sink(#[source] std::io::Error),

    #[error("malformed packet: {0}")]
    Malformed(#[from] PacketError),

    /// Nothing arrived before the deadline.
    #[error("timed out waiting for a datagram")]
    Timeout,

    /// A hop configured with `max_attempts` gave up on a packet.
    #[error("packet #{id} not acknowledged after {attempts} attempts")]
    RetriesExhausted { id: u32, attempts: u32 },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The relay queue lost its other end (one relay loop has stopped).
    #[error("relay queue closed")]
    QueueClosed,

    #[error("relay task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;
