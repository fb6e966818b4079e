//! The sender's end-to-end send buffer.
//!
//! [`SendBuffer`] holds packets that the relay has locally acknowledged but
//! whose delivery has not yet been confirmed by an end-to-end ack.  It is a
//! FIFO bounded by the end-to-end window `W`:
//!
//! ```text
//!  oldest                       newest
//!    │                            │
//!  ──┼────────────────────────────┼──▶ packet ids
//!    │ <── len() <= capacity ───▶ │
//! ```
//!
//! An end-to-end ack releases a whole batch from the front, not one entry.
//!
//! This module only manages state; waiting for acks is the caller's job.

use std::collections::VecDeque;

use crate::packet::Packet;

#[derive(Debug)]
pub struct SendBuffer {
    entries: VecDeque<Packet>,
    capacity: usize,
}

impl SendBuffer {
    /// `capacity` is the end-to-end window `W` (≥ 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` when another push would exceed `W`.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Append a locally acknowledged packet.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if the buffer is already full.  Check
    /// [`is_full`](Self::is_full) first.
    pub fn push(&mut self, packet: Packet) {
        debug_assert!(
            !self.is_full(),
            "push on a full send buffer ({} / {})",
            self.entries.len(),
            self.capacity
        );
        self.entries.push_back(packet);
    }

    /// Release up to `n` of the oldest entries and return how many went.
    pub fn release(&mut self, n: usize) -> usize {
        let n = n.min(self.entries.len());
        self.entries.drain(..n);
        n
    }

    /// Id of the oldest unconfirmed packet.
    pub fn oldest_id(&self) -> Option<u32> {
        self.entries.front().map(|p| p.id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
