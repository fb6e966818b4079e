//! The sending role (fixed host).
//!
//! [`Sender`] reads the source stream, cuts it into chunks of
//! `cwnd × mss` bytes, numbers them from 0 and delivers each one over the
//! data hop before reading the next.
//!
//! # Send loop, per chunk
//! 1. Apply any end-to-end acks that already arrived; if the send buffer
//!    still holds `W` packets, wait for the next one.
//! 2. Deliver the packet with [`Hop::deliver`], feeding every attempt's
//!    outcome to the [`CongestionController`].  A retransmission resends
//!    the same bytes even if `cwnd` changed meanwhile; only the *next*
//!    chunk picks up the new size.
//! 3. Park the packet in the [`SendBuffer`] until an end-to-end ack.
//!
//! When the source is exhausted a zero-length packet closes the session.

use std::path::Path;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::channel::LossyChannel;
use crate::config::SplitTcpConfig;
use crate::congestion::CongestionController;
use crate::error::{Result, TransferError};
use crate::hop::Hop;
use crate::packet::Packet;
use crate::send_buffer::SendBuffer;
use crate::state::AttemptOutcome;

/// Acks are empty, but read into a small buffer in case a peer pads them.
const E2E_BUF_LEN: usize = 1024;

/// Summary of one completed transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Packets delivered, including the end-of-session marker.
    pub packets: u32,
    /// Payload bytes read from the source.
    pub bytes: u64,
    /// Datagrams handed to the data hop (first sends plus retransmissions).
    pub transmissions: u64,
    pub retransmissions: u64,
    /// End-to-end acks consumed.
    pub e2e_acks: u64,
    pub final_cwnd: usize,
    pub final_ssthresh: usize,
    pub elapsed: std::time::Duration,
}

pub struct Sender {
    hop: Hop,
    e2e: LossyChannel,
    buffer: SendBuffer,
    congestion: CongestionController,
    initial_ssthresh: usize,
    window: usize,
    mss: usize,
    e2e_buf: Vec<u8>,
}

impl Sender {
    /// Bind the data and end-to-end sockets from `config.endpoints`.
    pub async fn bind(config: &SplitTcpConfig) -> Result<Self> {
        config.validate()?;
        let data = LossyChannel::bind(
            config.endpoints.sender_data,
            config.data_hop.loss,
            config.channel_seed(1),
        )
        .await?;
        // The end-to-end socket only receives; it never drops anything.
        let e2e =
            LossyChannel::bind(config.endpoints.sender_e2e, 0.0, config.channel_seed(2)).await?;
        Self::from_channels(config, data, e2e)
    }

    /// Build a sender on already-bound channels.
    ///
    /// `data` sends to `config.endpoints.relay_inbound` and receives local
    /// acks; `e2e` receives end-to-end acks.
    pub fn from_channels(
        config: &SplitTcpConfig,
        data: LossyChannel,
        e2e: LossyChannel,
    ) -> Result<Self> {
        config.validate()?;
        log::info!(
            "[sender] data {} -> relay {}, e2e on {}, W={} mss={}",
            data.local_addr(),
            config.endpoints.relay_inbound,
            e2e.local_addr(),
            config.window,
            config.mss
        );
        Ok(Self {
            hop: Hop::new(
                data.with_label("sender:data"),
                config.endpoints.relay_inbound,
                &config.data_hop,
            ),
            e2e: e2e.with_label("sender:e2e"),
            buffer: SendBuffer::new(config.window),
            congestion: CongestionController::new(config.initial_ssthresh, config.window),
            initial_ssthresh: config.initial_ssthresh,
            window: config.window,
            mss: config.mss,
            e2e_buf: vec![0u8; E2E_BUF_LEN],
        })
    }

    pub fn cwnd(&self) -> usize {
        self.congestion.cwnd()
    }

    pub fn ssthresh(&self) -> usize {
        self.congestion.ssthresh()
    }

    /// Packets awaiting an end-to-end ack.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Open `path` and send its contents.
    pub async fn send_file(&mut self, path: impl AsRef<Path>) -> Result<TransferReport> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(TransferError::Source)?;
        log::info!("[sender] sending {}", path.display());
        self.send_stream(file).await
    }

    /// Send everything `source` yields, then the end-of-session marker.
    ///
    /// Each call is a fresh session: ids restart at 0, congestion state is
    /// reset and end-to-end acks left over from an earlier session are
    /// discarded.  The end marker's own end-to-end ack is not awaited.
    pub async fn send_stream<R>(&mut self, mut source: R) -> Result<TransferReport>
    where
        R: AsyncRead + Unpin,
    {
        let started = Instant::now();
        let stale = self.e2e.drain()?;
        if stale > 0 {
            log::debug!("[sender] discarded {stale} end-to-end ack(s) from a previous session");
        }
        self.buffer.clear();
        self.congestion = CongestionController::new(self.initial_ssthresh, self.window);

        let mut report = TransferReport::default();
        let mut next_id: u32 = 0;

        loop {
            let chunk_len = self.congestion.cwnd() * self.mss;
            let chunk = read_chunk(&mut source, chunk_len).await?;
            let packet = if chunk.is_empty() {
                log::info!("[sender] source exhausted; sending end marker #{next_id}");
                Packet::end_marker(next_id)
            } else {
                Packet::new(next_id, chunk)
            };
            let last = packet.is_end_marker();
            report.bytes += packet.payload.len() as u64;

            self.send_packet(packet, &mut report).await?;

            if last {
                break;
            }
            next_id = next_id.wrapping_add(1);
        }

        report.final_cwnd = self.congestion.cwnd();
        report.final_ssthresh = self.congestion.ssthresh();
        report.elapsed = started.elapsed();
        log::info!(
            "[sender] transfer complete: {} packet(s), {} byte(s), {} retransmission(s) in {:?}",
            report.packets,
            report.bytes,
            report.retransmissions,
            report.elapsed
        );
        Ok(report)
    }

    async fn send_packet(&mut self, packet: Packet, report: &mut TransferReport) -> Result<()> {
        report.e2e_acks += self.poll_e2e_acks()?;
        if self.buffer.is_full() {
            log::debug!("[sender] buffer full ({}), waiting for end-to-end ack", self.buffer.len());
            self.wait_e2e_ack().await?;
            report.e2e_acks += 1;
        }

        let datagram = packet.encode()?;
        log::debug!(
            "[sender] -> #{} len={} cwnd={} buffered={}",
            packet.id,
            packet.payload.len(),
            self.congestion.cwnd(),
            self.buffer.len()
        );

        let congestion = &mut self.congestion;
        let attempts = self
            .hop
            .deliver(packet.id, &datagram, |outcome: AttemptOutcome| {
                congestion.on_outcome(outcome)
            })
            .await?;

        report.packets += 1;
        report.transmissions += u64::from(attempts);
        report.retransmissions += u64::from(attempts - 1);
        self.buffer.push(packet);
        Ok(())
    }

    /// Apply end-to-end acks that have already arrived, without waiting.
    fn poll_e2e_acks(&mut self) -> Result<u64> {
        let mut n = 0;
        while self.e2e.try_recv(&mut self.e2e_buf)?.is_some() {
            self.on_e2e_ack();
            n += 1;
        }
        Ok(n)
    }

    /// Wait, without a deadline, for one end-to-end ack.
    async fn wait_e2e_ack(&mut self) -> Result<()> {
        self.e2e.recv(&mut self.e2e_buf, None).await?;
        self.on_e2e_ack();
        Ok(())
    }

    fn on_e2e_ack(&mut self) {
        let released = self.buffer.release(self.window);
        log::debug!(
            "[sender] <- end-to-end ack, released {released}, {} still buffered",
            self.buffer.len()
        );
    }
}

/// Read up to `len` bytes, stopping early only at end of stream.
async fn read_chunk<R>(source: &mut R, len: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = Vec::with_capacity(len);
    source
        .take(len as u64)
        .read_to_end(&mut chunk)
        .await
        .map_err(TransferError::Source)?;
    Ok(chunk)
}
