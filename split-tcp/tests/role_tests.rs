//! Each role tested against hand-driven fake peers.
//!
//! The peers are plain [`LossyChannel`]s with zero loss, so every datagram the
//! role emits can be observed and every reply is under the test's control.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use split_tcp::channel::LossyChannel;
use split_tcp::packet::Packet;
use split_tcp::relay::RelayStats;
use split_tcp::{
    Endpoints, HopConfig, MemorySink, Receiver, Relay, Sender, SplitTcpConfig, TransferError,
};

const WAIT: Duration = Duration::from_secs(5);

async fn ephemeral() -> LossyChannel {
    let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
    LossyChannel::bind(any, 0.0, Some(0)).await.expect("bind failed")
}

/// Six lossless loopback channels in `Endpoints` order.
async fn six() -> [LossyChannel; 6] {
    [
        ephemeral().await,
        ephemeral().await,
        ephemeral().await,
        ephemeral().await,
        ephemeral().await,
        ephemeral().await,
    ]
}

fn config_for(ch: &[LossyChannel; 6], window: usize, mss: usize) -> SplitTcpConfig {
    let hop = HopConfig {
        rto: Duration::from_millis(200),
        loss: 0.0,
        max_attempts: None,
    };
    SplitTcpConfig {
        endpoints: Endpoints {
            sender_data: ch[0].local_addr(),
            sender_e2e: ch[1].local_addr(),
            relay_inbound: ch[2].local_addr(),
            relay_e2e: ch[3].local_addr(),
            relay_outbound: ch[4].local_addr(),
            receiver: ch[5].local_addr(),
        },
        window,
        mss,
        data_hop: hop,
        forward_hop: hop,
        ..SplitTcpConfig::default().lossless()
    }
}

async fn recv_packet(
    ch: &LossyChannel,
    wait: Duration,
) -> Result<(Packet, SocketAddr), TransferError> {
    let mut buf = vec![0u8; 65_536];
    let (n, from) = ch.recv(&mut buf, Some(wait)).await?;
    Ok((Packet::decode(&buf[..n])?, from))
}

async fn recv_ack(ch: &LossyChannel, wait: Duration) -> Result<(), TransferError> {
    let mut buf = [0u8; 64];
    let (n, _) = ch.recv(&mut buf, Some(wait)).await?;
    assert_eq!(n, 0, "acks carry no payload");
    Ok(())
}

/// Poll `cond` until it holds or `WAIT` runs out.
async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let give_up = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < give_up {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    cond()
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// With the window pinned to one segment, a 10-byte source is cut into
/// 4-byte chunks and closed by an empty packet.
#[tokio::test]
async fn test_sender_segments_into_mss_chunks() {
    let ch = six().await;
    let config = config_for(&ch, 1, 4);
    let [sender_data, sender_e2e, relay_in, relay_e2e, _, _] = ch;
    let e2e_target = config.endpoints.sender_e2e;

    // Fake relay: local ack + end-to-end ack for every packet (W = 1).
    let fake_relay = tokio::spawn(async move {
        let mut seen = Vec::new();
        loop {
            let (packet, from) = recv_packet(&relay_in, WAIT).await.expect("relay recv");
            relay_in.send(&[], from).await.unwrap();
            relay_e2e.send(&[], e2e_target).await.unwrap();
            let done = packet.is_end_marker();
            seen.push(packet);
            if done {
                return seen;
            }
        }
    });

    let mut sender = Sender::from_channels(&config, sender_data, sender_e2e).unwrap();
    let report = timeout(WAIT, sender.send_stream(&b"abcdefghij"[..]))
        .await
        .expect("sender timed out")
        .expect("send failed");

    let seen = fake_relay.await.unwrap();
    let ids: Vec<u32> = seen.iter().map(|p| p.id).collect();
    let payloads: Vec<&[u8]> = seen.iter().map(|p| p.payload.as_slice()).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    assert_eq!(payloads, vec![&b"abcd"[..], b"efgh", b"ij", b""]);
    assert_eq!(report.packets, 4);
    // The end marker's end-to-end ack arrives after the session has ended.
    assert_eq!(report.e2e_acks, 3);
}

/// An end-to-end ack that arrives after a session ends must not count
/// toward, or release buffer space in, the next one.
#[tokio::test]
async fn test_sender_discards_end_to_end_acks_from_previous_session() {
    let ch = six().await;
    let config = config_for(&ch, 1, 4);
    let [sender_data, sender_e2e, relay_in, relay_e2e, _, _] = ch;
    let e2e_target = config.endpoints.sender_e2e;

    // Fake relay serving two sessions, acking every packet both ways.
    let fake_relay = tokio::spawn(async move {
        let mut sessions = 0;
        while sessions < 2 {
            let (packet, from) = recv_packet(&relay_in, WAIT).await.expect("relay recv");
            relay_in.send(&[], from).await.unwrap();
            relay_e2e.send(&[], e2e_target).await.unwrap();
            if packet.is_end_marker() {
                sessions += 1;
            }
        }
    });

    let mut sender = Sender::from_channels(&config, sender_data, sender_e2e).unwrap();
    let first = timeout(WAIT, sender.send_stream(&b"abcdefgh"[..]))
        .await
        .unwrap()
        .unwrap();
    // Only the end marker is still waiting for its end-to-end ack.
    assert_eq!(sender.buffered(), 1);
    // Let that ack land on the socket before the next session starts.
    sleep(Duration::from_millis(100)).await;

    let second = timeout(WAIT, sender.send_stream(&b"abcdefgh"[..]))
        .await
        .unwrap()
        .unwrap();
    fake_relay.await.unwrap();

    assert_eq!(first.e2e_acks, 2);
    assert_eq!(second.e2e_acks, 2);
}

/// Each new chunk is `cwnd × mss` bytes at the moment it is cut; a
/// retransmission resends the old chunk even after a timeout shrank `cwnd`.
#[tokio::test]
async fn test_sender_chunk_size_follows_cwnd() {
    let ch = six().await;
    let mut config = config_for(&ch, 8, 4);
    config.initial_ssthresh = 4;
    config.data_hop.rto = Duration::from_millis(100);
    let [sender_data, sender_e2e, relay_in, _relay_e2e, _, _] = ch;

    // Fake relay: record (id, payload length), swallow the first copy of #3.
    let fake_relay = tokio::spawn(async move {
        let mut sends = Vec::new();
        let mut dropped = false;
        loop {
            let (packet, from) = recv_packet(&relay_in, WAIT).await.expect("relay recv");
            sends.push((packet.id, packet.payload.len()));
            if packet.id == 3 && !dropped {
                dropped = true;
                continue;
            }
            relay_in.send(&[], from).await.unwrap();
            if packet.is_end_marker() {
                return sends;
            }
        }
    });

    let mut sender = Sender::from_channels(&config, sender_data, sender_e2e).unwrap();
    let report = timeout(WAIT, sender.send_stream(&[9u8; 56][..]))
        .await
        .expect("sender timed out")
        .expect("send failed");

    let sends = fake_relay.await.unwrap();
    // cwnd 1, 2, 4 in slow start; 5 at ssthresh; timeout -> cwnd 1,
    // ssthresh 2; then 2 and 3.
    assert_eq!(
        sends,
        vec![(0, 4), (1, 8), (2, 16), (3, 20), (3, 20), (4, 8), (5, 0)]
    );
    assert_eq!(report.retransmissions, 1);
    assert_eq!((sender.cwnd(), sender.ssthresh()), (4, 2));
    assert_eq!((report.final_cwnd, report.final_ssthresh), (4, 2));
}

/// A relay that never acks within the RTO causes the same bytes to be sent
/// again, and the congestion window collapses.
#[tokio::test]
async fn test_sender_retransmits_identical_bytes_on_timeout() {
    let ch = six().await;
    let mut config = config_for(&ch, 4, 8);
    config.data_hop.rto = Duration::from_millis(100);
    let [sender_data, sender_e2e, relay_in, relay_e2e, _, _] = ch;
    let e2e_target = config.endpoints.sender_e2e;

    let fake_relay = tokio::spawn(async move {
        let mut buf = vec![0u8; 1024];
        // Swallow the first transmission.
        let (n1, _) = relay_in.recv(&mut buf, Some(WAIT)).await.unwrap();
        let first = buf[..n1].to_vec();
        let (n2, from) = relay_in.recv(&mut buf, Some(WAIT)).await.unwrap();
        let second = buf[..n2].to_vec();
        relay_in.send(&[], from).await.unwrap();
        relay_e2e.send(&[], e2e_target).await.unwrap();

        // End marker.
        let (_, from) = relay_in.recv(&mut buf, Some(WAIT)).await.unwrap();
        relay_in.send(&[], from).await.unwrap();
        (first, second)
    });

    let mut sender = Sender::from_channels(&config, sender_data, sender_e2e).unwrap();
    let report = timeout(WAIT, sender.send_stream(&b"12345678"[..]))
        .await
        .unwrap()
        .unwrap();

    let (first, second) = fake_relay.await.unwrap();
    assert_eq!(first, second);
    assert_eq!(report.retransmissions, 1);
    // cwnd was 1 when the timeout hit, so ssthresh fell to its floor.
    assert_eq!(report.final_ssthresh, 1);
}

/// With `W = 3` and no end-to-end acks the sender parks after three packets
/// and resumes as soon as one arrives.
#[tokio::test]
async fn test_sender_blocks_on_full_buffer() {
    let ch = six().await;
    let config = config_for(&ch, 3, 4);
    let [sender_data, sender_e2e, relay_in, relay_e2e, _, _] = ch;
    let e2e_target = config.endpoints.sender_e2e;

    let mut sender = Sender::from_channels(&config, sender_data, sender_e2e).unwrap();
    let source = std::io::Cursor::new(vec![7u8; 200]);
    let sending = tokio::spawn(async move { sender.send_stream(source).await });

    for expected in 0..3u32 {
        let (packet, from) = recv_packet(&relay_in, WAIT).await.expect("packet");
        assert_eq!(packet.id, expected);
        relay_in.send(&[], from).await.unwrap();
    }

    let res = recv_packet(&relay_in, Duration::from_millis(400)).await;
    assert!(
        matches!(res, Err(TransferError::Timeout)),
        "fourth packet sent without an end-to-end ack"
    );

    relay_e2e.send(&[], e2e_target).await.unwrap();
    let (packet, _) = recv_packet(&relay_in, WAIT)
        .await
        .expect("sender did not resume");
    assert_eq!(packet.id, 3);

    sending.abort();
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

struct RelayRig {
    sender_data: LossyChannel,
    sender_e2e: LossyChannel,
    receiver: LossyChannel,
    relay_inbound: SocketAddr,
    stats: Arc<RelayStats>,
    handle: split_tcp::RelayHandle,
}

async fn relay_rig(window: usize) -> RelayRig {
    let ch = six().await;
    let config = config_for(&ch, window, 16);
    let [sender_data, sender_e2e, relay_in, relay_e2e, relay_out, receiver] = ch;
    let handle = Relay::from_channels(&config, relay_in, relay_e2e, relay_out)
        .unwrap()
        .spawn();
    RelayRig {
        sender_data,
        sender_e2e,
        receiver,
        relay_inbound: config.endpoints.relay_inbound,
        stats: handle.stats(),
        handle,
    }
}

/// Spawn a fake receiver that acks everything and reports each packet.
fn spawn_acking_receiver(
    receiver: LossyChannel,
) -> tokio::sync::mpsc::UnboundedReceiver<Packet> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_536];
        while let Ok((n, from)) = receiver.recv(&mut buf, None).await {
            receiver.send(&[], from).await.unwrap();
            if let Ok(p) = Packet::decode(&buf[..n]) {
                let _ = tx.send(p);
            }
        }
    });
    rx
}

#[tokio::test]
async fn test_relay_acks_locally_and_forwards_in_order() {
    let rig = relay_rig(10).await;
    let mut forwarded = spawn_acking_receiver(rig.receiver);

    for id in 0..5u32 {
        let p = Packet::new(id, vec![id as u8; 3]).encode().unwrap();
        rig.sender_data.send(&p, rig.relay_inbound).await.unwrap();
        recv_ack(&rig.sender_data, WAIT).await.expect("local ack");
    }

    for id in 0..5u32 {
        let p = timeout(WAIT, forwarded.recv()).await.unwrap().unwrap();
        assert_eq!(p.id, id);
        assert_eq!(p.payload, vec![id as u8; 3]);
    }
    rig.handle.abort();
}

/// An end-to-end ack follows exactly the packets whose id is a multiple of W.
#[tokio::test]
async fn test_relay_end_to_end_ack_every_window() {
    let rig = relay_rig(5).await;
    let _forwarded = spawn_acking_receiver(rig.receiver);

    for id in 0..=10u32 {
        let p = Packet::new(id, b"data".to_vec()).encode().unwrap();
        rig.sender_data.send(&p, rig.relay_inbound).await.unwrap();
        recv_ack(&rig.sender_data, WAIT).await.expect("local ack");

        let stats = Arc::clone(&rig.stats);
        assert!(eventually(|| stats.forwarded() == u64::from(id) + 1).await);

        let e2e = recv_ack(&rig.sender_e2e, Duration::from_millis(300)).await;
        if id % 5 == 0 {
            assert!(e2e.is_ok(), "missing end-to-end ack after #{id}");
        } else {
            assert!(
                matches!(e2e, Err(TransferError::Timeout)),
                "spurious end-to-end ack after #{id}"
            );
        }
    }

    let stats = Arc::clone(&rig.stats);
    assert!(eventually(|| stats.e2e_acks() == 3).await);
    rig.handle.abort();
}

/// The relay does not filter retransmissions; the receiver does.
#[tokio::test]
async fn test_relay_forwards_duplicates() {
    let rig = relay_rig(10).await;
    let mut forwarded = spawn_acking_receiver(rig.receiver);

    let p = Packet::new(0, b"again".to_vec()).encode().unwrap();
    for _ in 0..2 {
        rig.sender_data.send(&p, rig.relay_inbound).await.unwrap();
        recv_ack(&rig.sender_data, WAIT).await.expect("local ack");
    }

    for _ in 0..2 {
        let got = timeout(WAIT, forwarded.recv()).await.unwrap().unwrap();
        assert_eq!(got.id, 0);
    }
    assert_eq!(rig.stats.accepted(), 2);
    rig.handle.abort();
}

#[tokio::test]
async fn test_relay_drops_malformed_without_ack() {
    let rig = relay_rig(10).await;

    rig.sender_data
        .send(&[0xde, 0xad, 0xbe], rig.relay_inbound)
        .await
        .unwrap();

    let res = recv_ack(&rig.sender_data, Duration::from_millis(300)).await;
    assert!(matches!(res, Err(TransferError::Timeout)));
    assert_eq!(rig.stats.malformed(), 1);
    assert_eq!(rig.stats.accepted(), 0);
    rig.handle.abort();
}

/// The forwarding hop keeps retrying a receiver that does not answer.
#[tokio::test]
async fn test_relay_retransmits_toward_silent_receiver() {
    let rig = relay_rig(10).await;

    let p = Packet::new(0, b"hello".to_vec()).encode().unwrap();
    rig.sender_data.send(&p, rig.relay_inbound).await.unwrap();
    recv_ack(&rig.sender_data, WAIT).await.expect("local ack");

    let (first, _) = recv_packet(&rig.receiver, WAIT).await.unwrap();
    let (second, from) = recv_packet(&rig.receiver, WAIT).await.unwrap();
    assert_eq!(first, second);
    rig.receiver.send(&[], from).await.unwrap();

    let stats = Arc::clone(&rig.stats);
    assert!(eventually(|| stats.forwarded() == 1).await);
    rig.handle.abort();
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

struct ReceiverRig {
    relay: LossyChannel,
    receiver_addr: SocketAddr,
    sink: MemorySink,
    session: tokio::task::JoinHandle<split_tcp::error::Result<split_tcp::SessionReport>>,
}

async fn receiver_rig() -> ReceiverRig {
    let ch = six().await;
    let config = config_for(&ch, 10, 16);
    let [_, _, _, _, relay_out, receiver] = ch;
    let sink = MemorySink::new();
    let mut receiver = Receiver::from_channel(&config, receiver, sink.clone());
    let receiver_addr = receiver.local_addr();
    let session = tokio::spawn(async move { receiver.next_session().await });
    ReceiverRig {
        relay: relay_out,
        receiver_addr,
        sink,
        session,
    }
}

impl ReceiverRig {
    /// Deliver `packet` and wait for its local ack.
    async fn push(&self, packet: Packet) {
        let bytes = packet.encode().unwrap();
        self.relay.send(&bytes, self.receiver_addr).await.unwrap();
        recv_ack(&self.relay, WAIT).await.expect("receiver did not ack");
    }
}

#[tokio::test]
async fn test_receiver_writes_duplicates_once_but_acks_each() {
    let rig = receiver_rig().await;

    rig.push(Packet::new(0, b"ab".to_vec())).await;
    rig.push(Packet::new(0, b"ab".to_vec())).await;
    rig.push(Packet::new(1, b"cd".to_vec())).await;
    rig.push(Packet::new(1, b"cd".to_vec())).await;
    rig.push(Packet::end_marker(2)).await;

    let report = timeout(WAIT, rig.session).await.unwrap().unwrap().unwrap();
    assert_eq!(rig.sink.last_session().unwrap(), b"abcd");
    assert_eq!(report.packets, 3);
    assert_eq!(report.duplicates, 2);
    assert_eq!(report.bytes, 4);
}

#[tokio::test]
async fn test_receiver_acks_but_discards_packets_before_a_session() {
    let rig = receiver_rig().await;

    rig.push(Packet::new(4, b"stray".to_vec())).await;
    assert!(rig.sink.sessions().is_empty());

    rig.push(Packet::new(0, b"x".to_vec())).await;
    rig.push(Packet::end_marker(1)).await;

    timeout(WAIT, rig.session).await.unwrap().unwrap().unwrap();
    assert_eq!(rig.sink.sessions(), vec![b"x".to_vec()]);
}

#[tokio::test]
async fn test_receiver_ignores_corrupted_datagrams() {
    let rig = receiver_rig().await;

    let mut bytes = Packet::new(0, b"payload".to_vec()).encode().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    rig.relay.send(&bytes, rig.receiver_addr).await.unwrap();
    let res = recv_ack(&rig.relay, Duration::from_millis(300)).await;
    assert!(matches!(res, Err(TransferError::Timeout)), "corrupted datagram was acked");

    rig.push(Packet::new(0, b"payload".to_vec())).await;
    rig.push(Packet::end_marker(1)).await;
    timeout(WAIT, rig.session).await.unwrap().unwrap().unwrap();
    assert_eq!(rig.sink.last_session().unwrap(), b"payload");
}

#[tokio::test]
async fn test_receiver_serves_one_datagram_at_a_time() {
    let ch = six().await;
    let config = config_for(&ch, 10, 16);
    let [_, _, _, _, relay, receiver] = ch;
    let sink = MemorySink::new();
    let mut receiver = Receiver::from_channel(&config, receiver, sink.clone());
    assert_eq!(receiver.last_accepted(), None);

    for packet in [Packet::new(0, b"he".to_vec()), Packet::new(1, b"y".to_vec())] {
        let bytes = packet.encode().unwrap();
        relay.send(&bytes, receiver.local_addr()).await.unwrap();
        let done = timeout(WAIT, receiver.serve_one()).await.unwrap().unwrap();
        assert!(done.is_none());
        recv_ack(&relay, WAIT).await.expect("receiver did not ack");
    }
    assert_eq!(receiver.last_accepted(), Some(1));

    let bytes = Packet::end_marker(2).encode().unwrap();
    relay.send(&bytes, receiver.local_addr()).await.unwrap();
    let report = timeout(WAIT, receiver.serve_one())
        .await
        .unwrap()
        .unwrap()
        .expect("end marker should close the session");
    assert_eq!(report.bytes, 3);
    assert_eq!(sink.last_session().unwrap(), b"hey");
}
