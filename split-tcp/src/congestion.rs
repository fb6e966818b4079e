//! Sender-side congestion control.
//!
//! Classic slow start / congestion avoidance / multiplicative decrease on
//! timeout, counted in segments:
//!
//! | outcome    | condition           | effect                                   |
//! |------------|---------------------|------------------------------------------|
//! | `Acked`    | `cwnd < ssthresh`   | `cwnd *= 2` (slow start)                 |
//! | `Acked`    | `cwnd >= ssthresh`  | `cwnd += 1` (congestion avoidance)       |
//! | `TimedOut` |                     | `ssthresh = max(1, cwnd / 2)`, `cwnd = 1`|
//!
//! After every step `cwnd` is capped at the end-to-end window: a chunk larger
//! than the relay is willing to buffer is pointless.

use crate::state::AttemptOutcome;

/// One step of the controller as a pure function.
///
/// Returns `(cwnd', ssthresh')`.
pub fn next_window(
    outcome: AttemptOutcome,
    cwnd: usize,
    ssthresh: usize,
    window_cap: usize,
) -> (usize, usize) {
    let (cwnd, ssthresh) = match outcome {
        AttemptOutcome::Acked if cwnd >= ssthresh => (cwnd.saturating_add(1), ssthresh),
        AttemptOutcome::Acked => (cwnd.saturating_mul(2), ssthresh),
        AttemptOutcome::TimedOut => (1, (cwnd / 2).max(1)),
    };
    (cwnd.min(window_cap).max(1), ssthresh)
}

/// Congestion state owned by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CongestionController {
    cwnd: usize,
    ssthresh: usize,
    window_cap: usize,
}

impl CongestionController {
    /// Start in slow start with `cwnd = 1`.
    pub fn new(initial_ssthresh: usize, window_cap: usize) -> Self {
        Self::with_cwnd(1, initial_ssthresh, window_cap)
    }

    pub fn with_cwnd(cwnd: usize, ssthresh: usize, window_cap: usize) -> Self {
        let window_cap = window_cap.max(1);
        Self {
            cwnd: cwnd.clamp(1, window_cap),
            ssthresh: ssthresh.max(1),
            window_cap,
        }
    }

    /// Congestion window in segments.
    pub fn cwnd(&self) -> usize {
        self.cwnd
    }

    /// Slow-start threshold in segments.
    pub fn ssthresh(&self) -> usize {
        self.ssthresh
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// Apply the outcome of one per-hop attempt.
    pub fn on_outcome(&mut self, outcome: AttemptOutcome) {
        let (cwnd, ssthresh) = next_window(outcome, self.cwnd, self.ssthresh, self.window_cap);
        log::trace!(
            "[cc] {outcome:?}: cwnd {} -> {cwnd}, ssthresh {} -> {ssthresh}",
            self.cwnd,
            self.ssthresh
        );
        self.cwnd = cwnd;
        self.ssthresh = ssthresh;
    }
}
