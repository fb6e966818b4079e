//! Stop-and-wait reliability for one hop.
//!
//! [`Hop`] is the primitive shared by the sender's data hop and the relay's
//! forwarding hop: send one datagram, then wait up to a fixed RTO for a local
//! acknowledgment on the same socket.
//!
//! # Stop-and-Wait contract
//! - At most **one** packet is in flight at any moment.
//! - The ack carries no payload; any datagram arriving on the hop's socket
//!   while a packet is in flight counts as its acknowledgment.
//! - [`Hop::attempt`] performs exactly one send-and-wait cycle.  Retrying is
//!   the caller's choice; [`Hop::deliver`] is the usual "retry until acked"
//!   loop and resends identical bytes every time.

use std::net::SocketAddr;
use std::time::Duration;

use crate::channel::LossyChannel;
use crate::config::HopConfig;
use crate::error::{Result, TransferError};
use crate::state::{AttemptOutcome, HopState};

/// Acks are empty, but read into a small buffer in case a peer pads them.
const ACK_BUF_LEN: usize = 1024;

/// Stop-and-wait sender state for one hop.
#[derive(Debug)]
pub struct Hop {
    channel: LossyChannel,
    peer: SocketAddr,
    rto: Duration,
    max_attempts: Option<u32>,
    state: HopState,
    ack_buf: Vec<u8>,
}

impl Hop {
    pub fn new(channel: LossyChannel, peer: SocketAddr, config: &HopConfig) -> Self {
        Self {
            channel,
            peer,
            rto: config.rto,
            max_attempts: config.max_attempts,
            state: HopState::Idle,
            ack_buf: vec![0u8; ACK_BUF_LEN],
        }
    }

    pub fn state(&self) -> HopState {
        self.state
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn channel(&self) -> &LossyChannel {
        &self.channel
    }

    /// Send `datagram` once and wait up to RTO for an acknowledgment.
    ///
    /// A timeout is a normal outcome, not an error.  Only a socket failure
    /// returns `Err`.
    pub async fn attempt(&mut self, datagram: &[u8]) -> Result<AttemptOutcome> {
        self.channel.send(datagram, self.peer).await?;
        self.state = HopState::AwaitingAck;

        let outcome = match self.channel.recv(&mut self.ack_buf, Some(self.rto)).await {
            Ok((_, from)) => {
                log::trace!("[hop] ack from {from}");
                AttemptOutcome::Acked
            }
            Err(TransferError::Timeout) => AttemptOutcome::TimedOut,
            Err(e) => {
                self.state = HopState::Idle;
                return Err(e);
            }
        };
        self.state = HopState::Idle;
        Ok(outcome)
    }

    /// Deliver packet `id` (already encoded as `datagram`), retransmitting the
    /// same bytes until it is acknowledged.
    ///
    /// `observe` sees every outcome in order: all timeouts, then the final
    /// `Acked`.  Returns the number of transmissions.
    pub async fn deliver<F>(&mut self, id: u32, datagram: &[u8], mut observe: F) -> Result<u32>
    where
        F: FnMut(AttemptOutcome),
    {
        // Late acks for an earlier packet must not acknowledge this one.
        let stale = self.channel.drain()?;
        if stale > 0 {
            log::debug!("[hop] discarded {stale} stale ack(s) before #{id}");
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if attempts > 1 {
                log::debug!("[hop] retransmitting #{id} (attempt {attempts})");
            }
            let outcome = self.attempt(datagram).await?;
            observe(outcome);
            match outcome {
                AttemptOutcome::Acked => return Ok(attempts),
                AttemptOutcome::TimedOut => {
                    log::debug!("[hop] #{id} timed out after {:?}", self.rto);
                    if self.max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(TransferError::RetriesExhausted { id, attempts });
                    }
                }
            }
        }
    }
}
