//! The relaying role (base station).
//!
//! The relay splits the reliability loop in two.  It runs two tasks that
//! share one FIFO queue:
//!
//! ```text
//!            ┌────────────────────── Relay ───────────────────────┐
//!  Sender ──▶│ inbound ──push──▶ Q ──pop──▶ outbound              │──▶ Receiver
//!         ◀──│ (local ack)          (Hop, fixed RTO)              │◀── local ack
//!         ◀──│ ───── end-to-end ack every W ids ─────             │
//!            └────────────────────────────────────────────────────┘
//! ```
//!
//! - **Inbound**: every decodable datagram from the sender is pushed onto the
//!   queue and locally acknowledged at once.  Retransmissions are forwarded
//!   as well; the receiver drops true duplicates.
//! - **Outbound**: pops the head of the queue and delivers it with a
//!   stop-and-wait [`Hop`] of its own, with no congestion control.  After a
//!   packet whose id is a multiple of `W` is acknowledged, an end-to-end ack
//!   goes back to the sender.
//!
//! The queue is an unbounded `tokio::sync::mpsc` channel: pushing never
//! waits, popping suspends while it is empty.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::LossyChannel;
use crate::config::{SplitTcpConfig, MAX_DATAGRAM};
use crate::error::{Result, TransferError};
use crate::hop::Hop;
use crate::packet::Packet;

/// `true` when forwarding packet `id` must be followed by an end-to-end ack.
pub fn is_window_boundary(id: u32, window: u32) -> bool {
    window != 0 && id % window == 0
}

/// Counters shared by both relay tasks.
#[derive(Debug, Default)]
pub struct RelayStats {
    accepted: AtomicU64,
    malformed: AtomicU64,
    forwarded: AtomicU64,
    e2e_acks: AtomicU64,
}

impl RelayStats {
    /// Packets taken from the sender and queued.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Datagrams from the sender that failed to decode.
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Packets acknowledged by the receiver.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// End-to-end acks emitted (including ones the loss model then dropped).
    pub fn e2e_acks(&self) -> u64 {
        self.e2e_acks.load(Ordering::Relaxed)
    }
}

pub struct Relay {
    inbound: LossyChannel,
    e2e: LossyChannel,
    forward: Hop,
    sender_data: SocketAddr,
    sender_e2e: SocketAddr,
    window: u32,
}

impl Relay {
    /// Bind the three relay sockets from `config.endpoints`.
    pub async fn bind(config: &SplitTcpConfig) -> Result<Self> {
        config.validate()?;
        let ep = &config.endpoints;
        let inbound =
            LossyChannel::bind(ep.relay_inbound, config.relay_ack_loss, config.channel_seed(3))
                .await?;
        let e2e =
            LossyChannel::bind(ep.relay_e2e, config.e2e_ack_loss, config.channel_seed(4)).await?;
        let outbound =
            LossyChannel::bind(ep.relay_outbound, config.forward_hop.loss, config.channel_seed(5))
                .await?;
        Self::from_channels(config, inbound, e2e, outbound)
    }

    /// Build a relay on already-bound channels.
    ///
    /// - `inbound` receives data from the sender and sends local acks to
    ///   `endpoints.sender_data`.
    /// - `e2e` sends end-to-end acks to `endpoints.sender_e2e`.
    /// - `outbound` forwards to `endpoints.receiver` and receives its acks.
    pub fn from_channels(
        config: &SplitTcpConfig,
        inbound: LossyChannel,
        e2e: LossyChannel,
        outbound: LossyChannel,
    ) -> Result<Self> {
        config.validate()?;
        let ep = &config.endpoints;
        let window = u32::try_from(config.window)
            .map_err(|_| crate::config::ConfigError::WindowTooLarge(config.window))?;
        log::info!(
            "[relay] inbound {} (from sender), outbound {} -> receiver {}, W={window}",
            inbound.local_addr(),
            outbound.local_addr(),
            ep.receiver
        );
        Ok(Self {
            inbound: inbound.with_label("relay:lack"),
            e2e: e2e.with_label("relay:e2e"),
            forward: Hop::new(outbound.with_label("relay:out"), ep.receiver, &config.forward_hop),
            sender_data: ep.sender_data,
            sender_e2e: ep.sender_e2e,
            window,
        })
    }

    /// Start both loops and return immediately.
    pub fn spawn(self) -> RelayHandle {
        let stats = Arc::new(RelayStats::default());
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<Packet>();

        let inbound = tokio::spawn(inbound_loop(
            self.inbound,
            self.sender_data,
            queue_tx,
            Arc::clone(&stats),
        ));
        let outbound = tokio::spawn(outbound_loop(
            self.forward,
            self.e2e,
            self.sender_e2e,
            self.window,
            queue_rx,
            Arc::clone(&stats),
        ));

        RelayHandle {
            inbound,
            outbound,
            stats,
        }
    }

    /// Run both loops until one of them fails.
    pub async fn run(self) -> Result<()> {
        self.spawn().wait().await
    }
}

/// Handle to a running relay.
pub struct RelayHandle {
    inbound: JoinHandle<Result<()>>,
    outbound: JoinHandle<Result<()>>,
    stats: Arc<RelayStats>,
}

impl RelayHandle {
    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Wait for the first loop to stop, then stop the other one.
    ///
    /// Both loops run forever unless their socket fails, so this resolves
    /// only with an error (or a task panic).
    pub async fn wait(mut self) -> Result<()> {
        let first = tokio::select! {
            res = &mut self.inbound => res,
            res = &mut self.outbound => res,
        };
        self.abort();
        first?
    }

    /// Stop both loops.
    pub fn abort(&self) {
        self.inbound.abort();
        self.outbound.abort();
    }
}

async fn inbound_loop(
    channel: LossyChannel,
    sender: SocketAddr,
    queue: mpsc::UnboundedSender<Packet>,
    stats: Arc<RelayStats>,
) -> Result<()> {
    log::info!("[relay:in] starting accept loop");
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = channel.recv(&mut buf, None).await?;
        let packet = match Packet::decode(&buf[..n]) {
            Ok(p) => p,
            Err(e) => {
                stats.malformed.fetch_add(1, Ordering::Relaxed);
                log::warn!("[relay:in] dropping malformed datagram from {from}: {e}");
                continue;
            }
        };
        log::debug!("[relay:in] <- #{} len={}; -> LACK", packet.id, packet.payload.len());

        queue.send(packet).map_err(|_| TransferError::QueueClosed)?;
        stats.accepted.fetch_add(1, Ordering::Relaxed);
        channel.send(&[], sender).await?;
    }
}

async fn outbound_loop(
    mut hop: Hop,
    e2e: LossyChannel,
    sender_e2e: SocketAddr,
    window: u32,
    mut queue: mpsc::UnboundedReceiver<Packet>,
    stats: Arc<RelayStats>,
) -> Result<()> {
    log::info!("[relay:out] starting forward loop");
    while let Some(packet) = queue.recv().await {
        let datagram = packet.encode()?;
        let attempts = hop.deliver(packet.id, &datagram, |_| {}).await?;
        stats.forwarded.fetch_add(1, Ordering::Relaxed);
        log::debug!("[relay:out] #{} acked after {attempts} attempt(s)", packet.id);

        if is_window_boundary(packet.id, window) {
            log::debug!("[relay:out] -> end-to-end ack for #{}", packet.id);
            e2e.send(&[], sender_e2e).await?;
            stats.e2e_acks.fetch_add(1, Ordering::Relaxed);
        }
    }
    Err(TransferError::QueueClosed)
}
