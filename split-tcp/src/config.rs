//! Protocol configuration shared by the three roles.
//!
//! There is no handshake: every role is started with the same
//! [`SplitTcpConfig`] and reads only the fields that concern it.
//!
//! ```text
//!   Sender                        Relay                        Receiver
//!  sender_data  ── data ──▶  relay_inbound
//!  sender_data  ◀── LACK ──  relay_inbound
//!  sender_e2e   ◀── E2E ───  relay_e2e
//!                            relay_outbound ── data ──▶  receiver
//!                            relay_outbound ◀── LACK ──  receiver
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

use crate::packet::HEADER_LEN;

/// Largest UDP payload over IPv4 (65 535 − 8 byte UDP header − 20 byte IP header).
pub const MAX_DATAGRAM: usize = 65_507;

pub const DEFAULT_SENDER_DATA_PORT: u16 = 7070;
pub const DEFAULT_SENDER_E2E_PORT: u16 = 7071;
pub const DEFAULT_RELAY_INBOUND_PORT: u16 = 9090;
pub const DEFAULT_RELAY_E2E_PORT: u16 = 9091;
pub const DEFAULT_RELAY_OUTBOUND_PORT: u16 = 9092;
pub const DEFAULT_RECEIVER_PORT: u16 = 6060;

/// Socket address of every channel endpoint.
///
/// Each acknowledgment kind travels between its own pair of ports so local
/// acks, end-to-end acks and data never share a socket queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    /// Sender's data socket: sends data, receives the relay's local acks.
    pub sender_data: SocketAddr,
    /// Sender's end-to-end ack socket.
    pub sender_e2e: SocketAddr,
    /// Relay socket facing the sender: receives data, sends local acks.
    pub relay_inbound: SocketAddr,
    /// Relay socket that emits end-to-end acks.
    pub relay_e2e: SocketAddr,
    /// Relay socket facing the receiver: sends data, receives local acks.
    pub relay_outbound: SocketAddr,
    /// Receiver socket: receives data, sends local acks.
    pub receiver: SocketAddr,
}

impl Endpoints {
    /// Default port layout on a single host.
    pub fn on_host(host: std::net::IpAddr) -> Self {
        Self {
            sender_data: SocketAddr::new(host, DEFAULT_SENDER_DATA_PORT),
            sender_e2e: SocketAddr::new(host, DEFAULT_SENDER_E2E_PORT),
            relay_inbound: SocketAddr::new(host, DEFAULT_RELAY_INBOUND_PORT),
            relay_e2e: SocketAddr::new(host, DEFAULT_RELAY_E2E_PORT),
            relay_outbound: SocketAddr::new(host, DEFAULT_RELAY_OUTBOUND_PORT),
            receiver: SocketAddr::new(host, DEFAULT_RECEIVER_PORT),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::on_host(Ipv4Addr::LOCALHOST.into())
    }
}

/// Reliability parameters of one hop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HopConfig {
    /// Fixed retransmission timeout. No back-off is applied.
    pub rto: Duration,
    /// Probability in `[0, 1]` that a data datagram on this hop is dropped.
    pub loss: f64,
    /// Give up on a packet after this many transmissions (`None` = never).
    pub max_attempts: Option<u32>,
}

impl Default for HopConfig {
    fn default() -> Self {
        Self {
            rto: Duration::from_millis(1000),
            loss: 0.1,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitTcpConfig {
    pub endpoints: Endpoints,
    /// End-to-end window `W`: packets the sender buffers until an
    /// end-to-end ack, and the relay's end-to-end ack period.
    pub window: usize,
    /// Maximum segment size in bytes. A chunk is `cwnd × mss` bytes.
    pub mss: usize,
    /// Slow-start threshold the sender starts with, in segments.
    pub initial_ssthresh: usize,
    /// Sender → Relay data hop.
    pub data_hop: HopConfig,
    /// Relay → Receiver forwarding hop.
    pub forward_hop: HopConfig,
    /// Drop probability of Relay → Sender local acks.
    pub relay_ack_loss: f64,
    /// Drop probability of Relay → Sender end-to-end acks.
    ///
    /// The sender waits indefinitely for these once its buffer is full, so a
    /// non-zero value can stall a transfer.
    pub e2e_ack_loss: f64,
    /// Drop probability of Receiver → Relay local acks.
    pub receiver_ack_loss: f64,
    /// Seed for the loss generators; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for SplitTcpConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            window: 10,
            mss: 1024,
            initial_ssthresh: 8,
            data_hop: HopConfig::default(),
            forward_hop: HopConfig::default(),
            relay_ack_loss: 0.0,
            e2e_ack_loss: 0.0,
            receiver_ack_loss: 0.1,
            seed: None,
        }
    }
}

impl SplitTcpConfig {
    /// Same parameters with every loss probability set to zero.
    pub fn lossless(mut self) -> Self {
        self.data_hop.loss = 0.0;
        self.forward_hop.loss = 0.0;
        self.relay_ack_loss = 0.0;
        self.e2e_ack_loss = 0.0;
        self.receiver_ack_loss = 0.0;
        self
    }

    /// Largest datagram a data packet can occupy: a full window-sized chunk.
    pub fn max_packet_len(&self) -> usize {
        HEADER_LEN + self.window.saturating_mul(self.mss)
    }

    /// Seed for the channel identified by `salt`, so each channel draws an
    /// independent but reproducible loss sequence.
    pub fn channel_seed(&self, salt: u64) -> Option<u64> {
        self.seed
            .map(|s| s ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.mss == 0 {
            return Err(ConfigError::ZeroMss);
        }
        if self.initial_ssthresh == 0 {
            return Err(ConfigError::ZeroSsthresh);
        }
        if u32::try_from(self.window).is_err() {
            return Err(ConfigError::WindowTooLarge(self.window));
        }
        if self.max_packet_len() > MAX_DATAGRAM {
            return Err(ConfigError::DatagramTooLarge {
                window: self.window,
                mss: self.mss,
            });
        }
        for (name, hop) in [("data", &self.data_hop), ("forward", &self.forward_hop)] {
            if hop.rto.is_zero() {
                return Err(ConfigError::ZeroRto(name));
            }
            if hop.max_attempts == Some(0) {
                return Err(ConfigError::ZeroAttempts(name));
            }
        }
        for (name, p) in [
            ("data hop", self.data_hop.loss),
            ("forward hop", self.forward_hop.loss),
            ("relay ack", self.relay_ack_loss),
            ("end-to-end ack", self.e2e_ack_loss),
            ("receiver ack", self.receiver_ack_loss),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::LossOutOfRange { name, value: p });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("window must be at least 1")]
    ZeroWindow,
    #[error("window {0} does not fit a 32-bit packet id")]
    WindowTooLarge(usize),
    #[error("mss must be at least 1 byte")]
    ZeroMss,
    #[error("initial ssthresh must be at least 1 segment")]
    ZeroSsthresh,
    #[error("{0} hop rto must be non-zero")]
    ZeroRto(&'static str),
    #[error("{0} hop max_attempts must be at least 1")]
    ZeroAttempts(&'static str),
    #[error("{name} loss probability {value} is outside [0, 1]")]
    LossOutOfRange { name: &'static str, value: f64 },
    #[error("window {window} × mss {mss} exceeds one UDP datagram")]
    DatagramTooLarge { window: usize, mss: usize },
}
