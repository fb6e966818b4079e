//! `split-tcp` — reliable file transfer over UDP with the reliability loop
//! split at a relay.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  data / LACK   ┌──────────┐  data / LACK   ┌──────────┐
//!  │  Sender  │───────────────▶│  Relay   │───────────────▶│ Receiver │
//!  │ (cwnd,   │◀───────────────│ (queue)  │◀───────────────│ (dedup)  │
//!  │  buffer) │◀─ end-to-end ──│          │                └──────────┘
//!  └────┬─────┘    ack         └────┬─────┘
//!       │                           │
//!  ┌────▼───────────────────────────▼──┐
//!  │   Hop (stop-and-wait, fixed RTO)  │
//!  └────┬──────────────────────────────┘
//!       │ raw UDP datagrams
//!  ┌────▼────────┐
//!  │ LossyChannel│  (simulated silent loss)
//!  └────┬────────┘
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! Each hop recovers its own losses: the sender only ever waits on the relay,
//! and the relay retries toward the receiver on its own timer.  The coarse
//! end-to-end ack, sent once every `W` packet ids, only bounds how much the
//! sender keeps buffered.
//!
//! Each module has a single responsibility:
//! - [`packet`]       — wire format (serialise / deserialise)
//! - [`socket`]       — async UDP socket abstraction
//! - [`channel`]      — loss-injecting send path
//! - [`state`]        — hop state and attempt outcomes
//! - [`hop`]          — stop-and-wait send-and-wait primitive
//! - [`congestion`]   — slow start / congestion avoidance controller
//! - [`send_buffer`]  — end-to-end window buffer
//! - [`sender`]       — sending role
//! - [`relay`]        — relaying role (inbound + outbound tasks)
//! - [`receiver`]     — receiving role and duplicate suppression
//! - [`sink`]         — output streams for received sessions
//! - [`config`]       — ports and protocol parameters
//! - [`error`]        — crate-wide error type

pub mod channel;
pub mod config;
pub mod congestion;
pub mod error;
pub mod hop;
pub mod packet;
pub mod receiver;
pub mod relay;
pub mod send_buffer;
pub mod sender;
pub mod sink;
pub mod socket;
pub mod state;

pub use config::{Endpoints, HopConfig, SplitTcpConfig};
pub use error::TransferError;
pub use packet::Packet;
pub use receiver::{Receiver, SessionReport};
pub use relay::{Relay, RelayHandle};
pub use sender::{Sender, TransferReport};
pub use sink::{FileSink, MemorySink, SessionSink};
