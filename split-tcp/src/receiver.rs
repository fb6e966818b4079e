//! The receiving role (mobile host).
//!
//! Two layers:
//! - [`Reassembly`] decides what to do with each arriving packet id.  No I/O.
//! - [`Receiver`] owns the socket and the output stream, applies those
//!   decisions, and sends one local ack back to the relay for every packet
//!   it decodes, duplicate or not.
//!
//! # Sequence rules
//!
//! `last` is the id of the last accepted packet (`None` before the first
//! one).  For an arriving id, checked in this order:
//! - `Some(id) == last` → duplicate: not written, still acked.
//! - `id == 0` → a session starts: the output is (re)opened.
//! - otherwise → accepted and `last = max(last, id)`.
//!
//! An id *below* `last` that is not an exact repeat is still written.  Ids
//! are only deduplicated against the single last accepted id; the hop-by-hop
//! stop-and-wait discipline is what keeps arrivals in order.

use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;

use crate::channel::LossyChannel;
use crate::config::{SplitTcpConfig, MAX_DATAGRAM};
use crate::error::{Result, TransferError};
use crate::packet::Packet;
use crate::sink::SessionSink;

/// What the receiver does with one decoded packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Same id as the last accepted packet; only acknowledge it.
    Duplicate,
    /// Id 0: open a fresh output stream, then deliver.
    Start,
    /// Deliver into the current session.
    Accept,
}

/// Duplicate suppression by last accepted id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reassembly {
    last: Option<u32>,
}

impl Reassembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the last accepted packet.
    pub fn last_accepted(&self) -> Option<u32> {
        self.last
    }

    pub fn on_packet(&mut self, id: u32) -> Disposition {
        if self.last == Some(id) {
            return Disposition::Duplicate;
        }
        if id == 0 {
            self.last = Some(0);
            return Disposition::Start;
        }
        match self.last {
            Some(last) if id < last => {
                log::warn!("[receiver] #{id} arrived after #{last}; writing it anyway");
            }
            _ => self.last = Some(id),
        }
        Disposition::Accept
    }
}

/// Summary of one completed session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Payload bytes written.
    pub bytes: u64,
    /// Packets written, including the end marker.
    pub packets: u32,
    /// Duplicates acknowledged but not written.
    pub duplicates: u32,
    /// Time from the id-0 packet to the end marker.
    pub elapsed: Duration,
}

struct Session<W> {
    writer: W,
    started: Instant,
    report: SessionReport,
}

pub struct Receiver<S: SessionSink> {
    channel: LossyChannel,
    relay: std::net::SocketAddr,
    sink: S,
    reassembly: Reassembly,
    session: Option<Session<S::Writer>>,
    buf: Vec<u8>,
}

impl<S: SessionSink> Receiver<S> {
    /// Bind `config.endpoints.receiver` and write sessions into `sink`.
    pub async fn bind(config: &SplitTcpConfig, sink: S) -> Result<Self> {
        config.validate()?;
        let channel = LossyChannel::bind(
            config.endpoints.receiver,
            config.receiver_ack_loss,
            config.channel_seed(6),
        )
        .await?;
        Ok(Self::from_channel(config, channel, sink))
    }

    /// `channel` receives data and sends local acks to
    /// `config.endpoints.relay_outbound`.
    pub fn from_channel(config: &SplitTcpConfig, channel: LossyChannel, sink: S) -> Self {
        log::info!(
            "[receiver] listening on {}, acking to {}",
            channel.local_addr(),
            config.endpoints.relay_outbound
        );
        Self {
            channel: channel.with_label("receiver:ack"),
            relay: config.endpoints.relay_outbound,
            sink,
            reassembly: Reassembly::new(),
            session: None,
            // Sized well above the largest packet a sender can produce.
            buf: vec![0u8; MAX_DATAGRAM],
        }
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.channel.local_addr()
    }

    pub fn last_accepted(&self) -> Option<u32> {
        self.reassembly.last_accepted()
    }

    /// Serve forever, one session after another.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let report = self.next_session().await?;
            log::info!(
                "[receiver] session done: {} byte(s), {} packet(s), {} duplicate(s) in {:?}",
                report.bytes,
                report.packets,
                report.duplicates,
                report.elapsed
            );
        }
    }

    /// Serve datagrams until a session's end marker has been written.
    pub async fn next_session(&mut self) -> Result<SessionReport> {
        loop {
            if let Some(report) = self.serve_one().await? {
                return Ok(report);
            }
        }
    }

    /// Receive and handle one datagram.
    ///
    /// Returns the session report when this datagram closed a session.
    pub async fn serve_one(&mut self) -> Result<Option<SessionReport>> {
        let (n, from) = self.channel.recv(&mut self.buf, None).await?;
        let packet = match Packet::decode(&self.buf[..n]) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("[receiver] dropping malformed datagram from {from}: {e}");
                return Ok(None);
            }
        };
        log::debug!("[receiver] <- #{} len={}", packet.id, packet.payload.len());

        let done = self.handle(packet).await?;
        self.channel.send(&[], self.relay).await?;
        Ok(done)
    }

    async fn handle(&mut self, packet: Packet) -> Result<Option<SessionReport>> {
        match self.reassembly.on_packet(packet.id) {
            Disposition::Duplicate => {
                log::debug!("[receiver] duplicate #{}, acking only", packet.id);
                if let Some(session) = self.session.as_mut() {
                    session.report.duplicates += 1;
                }
                return Ok(None);
            }
            Disposition::Start => self.open_session().await?,
            Disposition::Accept => {}
        }

        let Some(mut session) = self.session.take() else {
            log::warn!("[receiver] #{} outside any session, discarding", packet.id);
            return Ok(None);
        };

        session.report.packets += 1;
        if packet.is_end_marker() {
            session.writer.shutdown().await.map_err(TransferError::Sink)?;
            session.report.elapsed = session.started.elapsed();
            log::info!("[receiver] end of session at #{}", packet.id);
            return Ok(Some(session.report));
        }

        session
            .writer
            .write_all(&packet.payload)
            .await
            .map_err(TransferError::Sink)?;
        session.report.bytes += packet.payload.len() as u64;
        self.session = Some(session);
        Ok(None)
    }

    async fn open_session(&mut self) -> Result<()> {
        if let Some(mut stale) = self.session.take() {
            log::warn!("[receiver] new session before end marker; closing previous output");
            stale.writer.shutdown().await.map_err(TransferError::Sink)?;
        }
        let writer = self.sink.open().await.map_err(TransferError::Sink)?;
        log::info!("[receiver] session started");
        self.session = Some(Session {
            writer,
            started: Instant::now(),
            report: SessionReport::default(),
        });
        Ok(())
    }
}
