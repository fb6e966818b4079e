//! Lossy datagram channel.
//!
//! Real wireless links drop packets.  To exercise the reliability mechanisms
//! without depending on actual network conditions, every sending endpoint in
//! the protocol goes through a [`LossyChannel`]: it wraps a
//! [`crate::socket::Socket`] and, on each send, draws a uniform number in
//! `[0, 1)` and silently discards the datagram when the draw falls below the
//! configured loss probability.
//!
//! A dropped send still reports success.  Nothing above this layer can tell a
//! simulated drop from a datagram lost in the network, so all loss detection
//! has to rely on a missing acknowledgment.
//!
//! Receives are never dropped here; loss is applied once, by the sender side
//! of each direction.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, TransferError};
use crate::socket::Socket;

/// Send-side counters of one channel.
#[derive(Debug, Default)]
pub struct ChannelStats {
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelStats {
    /// Datagrams actually handed to the socket.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Datagrams discarded by the loss model.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A fault-injecting wrapper around the socket layer.
#[derive(Debug)]
pub struct LossyChannel {
    socket: Socket,
    loss: f64,
    rng: Mutex<StdRng>,
    stats: ChannelStats,
    label: &'static str,
}

impl LossyChannel {
    /// Wrap `socket`, dropping outbound datagrams with probability `loss`.
    ///
    /// A `seed` makes the drop sequence reproducible; `None` seeds from the OS.
    pub fn new(socket: Socket, loss: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            socket,
            loss,
            rng: Mutex::new(rng),
            stats: ChannelStats::default(),
            label: "lossy",
        }
    }

    /// Bind a socket at `addr` and wrap it.
    pub async fn bind(addr: SocketAddr, loss: f64, seed: Option<u64>) -> Result<Self> {
        let socket = Socket::bind(addr).await?;
        Ok(Self::new(socket, loss, seed))
    }

    /// Name used in log lines.
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn loss(&self) -> f64 {
        self.loss
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Send `bytes` to `dest`, unless the loss model drops it.
    ///
    /// Returns `Ok(())` either way.  Only a genuine socket failure is an error.
    pub async fn send(&self, bytes: &[u8], dest: SocketAddr) -> Result<()> {
        if self.should_drop() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!("[{}] dropped {} byte(s) to {dest}", self.label, bytes.len());
            return Ok(());
        }
        self.socket.send_to(bytes, dest).await?;
        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Receive the next datagram into `buf`.
    ///
    /// With `timeout = None` this waits indefinitely.  Past the deadline it
    /// fails with [`TransferError::Timeout`]; any other socket failure is
    /// [`TransferError::Transport`].
    pub async fn recv(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<(usize, SocketAddr)> {
        match self.socket.recv_from(buf, timeout).await {
            Ok(v) => Ok(v),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(TransferError::Timeout),
            Err(e) => Err(TransferError::Transport(e)),
        }
    }

    /// Receive a datagram only if one is already queued.
    pub fn try_recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        Ok(self.socket.try_recv_from(buf)?)
    }

    /// Discard every datagram already queued on the socket without waiting.
    ///
    /// Returns how many were discarded.
    pub fn drain(&self) -> Result<usize> {
        let mut scratch = [0u8; 64];
        let mut n = 0;
        while self.socket.try_recv_from(&mut scratch)?.is_some() {
            n += 1;
        }
        Ok(n)
    }

    fn should_drop(&self) -> bool {
        if self.loss <= 0.0 {
            return false;
        }
        // A poisoned lock only means another task panicked mid-draw; the RNG
        // state is still usable.
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        rng.random::<f64>() < self.loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn channel(loss: f64, seed: u64) -> LossyChannel {
        LossyChannel::bind("127.0.0.1:0".parse().unwrap(), loss, Some(seed))
            .await
            .expect("bind failed")
    }

    #[tokio::test]
    async fn zero_loss_always_delivers() {
        let tx = channel(0.0, 1).await;
        let rx = channel(0.0, 2).await;

        for i in 0..20u8 {
            tx.send(&[i], rx.local_addr()).await.unwrap();
            let mut buf = [0u8; 4];
            let (n, _) = rx.recv(&mut buf, Some(Duration::from_secs(2))).await.unwrap();
            assert_eq!(&buf[..n], &[i]);
        }
        assert_eq!(tx.stats().sent(), 20);
        assert_eq!(tx.stats().dropped(), 0);
    }

    #[tokio::test]
    async fn full_loss_reports_success_but_delivers_nothing() {
        let tx = channel(1.0, 1).await;
        let rx = channel(0.0, 2).await;
        assert_eq!(tx.loss(), 1.0);

        tx.send(b"gone", rx.local_addr()).await.unwrap();

        let mut buf = [0u8; 8];
        let res = rx.recv(&mut buf, Some(Duration::from_millis(50))).await;
        assert!(matches!(res, Err(TransferError::Timeout)));
        assert_eq!(tx.stats().dropped(), 1);
        assert_eq!(tx.stats().sent(), 0);
    }

    #[tokio::test]
    async fn same_seed_drops_the_same_datagrams() {
        let sink = channel(0.0, 0).await;
        let a = channel(0.5, 42).await;
        let b = channel(0.5, 42).await;

        let mut pattern_a = Vec::new();
        let mut pattern_b = Vec::new();
        for _ in 0..32 {
            let before = a.stats().dropped();
            a.send(b"x", sink.local_addr()).await.unwrap();
            pattern_a.push(a.stats().dropped() > before);

            let before = b.stats().dropped();
            b.send(b"x", sink.local_addr()).await.unwrap();
            pattern_b.push(b.stats().dropped() > before);
        }
        assert_eq!(pattern_a, pattern_b);
        assert!(pattern_a.iter().any(|&d| d), "some datagrams should drop");
        assert!(pattern_a.iter().any(|&d| !d), "some datagrams should pass");
    }

    #[tokio::test]
    async fn drain_discards_queued_datagrams() {
        let tx = channel(0.0, 1).await;
        let rx = channel(0.0, 2).await;

        for _ in 0..3 {
            tx.send(&[], rx.local_addr()).await.unwrap();
        }
        // Give loopback a moment to queue all three.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(rx.drain().unwrap(), 3);
        assert_eq!(rx.drain().unwrap(), 0);
    }
}
