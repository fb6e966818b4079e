//! Wire format for data segments.
//!
//! Every data-bearing datagram is a [`Packet`]: a sequence id and a payload.
//! Acknowledgments are *not* packets; they are empty datagrams whose arrival
//! alone carries the meaning (see [`crate::hop`]).
//!
//! No I/O happens here, this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Packet Id                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload Length                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |         Payload ...           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     (optional zero padding)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 10 bytes.
//! id(4) + payload_len(4) + checksum(2)
//!
//! The explicit length makes the encoding self-describing, so a datagram read
//! into an oversized, zero-initialised buffer still decodes.

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 10;

const OFF_ID: usize = 0;
const OFF_PAYLOAD_LEN: usize = 4;
const OFF_CHECKSUM: usize = 8;

/// One segment of the transferred file.
///
/// Ids are assigned by the sender, strictly increasing within a session and
/// starting at 0. A zero-length payload is the end-of-session marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(id: u32, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// The zero-length packet that closes a session.
    pub fn end_marker(id: u32) -> Self {
        Self {
            id,
            payload: Vec::new(),
        }
    }

    pub fn is_end_marker(&self) -> bool {
        self.payload.is_empty()
    }

    /// Number of bytes [`encode`](Self::encode) produces for this packet.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// Returns [`PacketError::PayloadTooLarge`] if the payload length does
    /// not fit the 32-bit length field.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let payload_len =
            u32::try_from(self.payload.len()).map_err(|_| PacketError::PayloadTooLarge)?;
        let mut buf = vec![0u8; self.encoded_len()];

        buf[OFF_ID..OFF_ID + 4].copy_from_slice(&self.id.to_be_bytes());
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 4].copy_from_slice(&payload_len.to_be_bytes());
        // Checksum field is zero while computing the checksum.
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the `payload_len` field claims more bytes than `buf` holds,
    /// - anything after the payload is not zero padding, or
    /// - the checksum does not verify.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let id = u32::from_be_bytes(read_array(buf, OFF_ID));
        let payload_len = u32::from_be_bytes(read_array(buf, OFF_PAYLOAD_LEN)) as usize;
        let checksum = u16::from_be_bytes(read_array(buf, OFF_CHECKSUM));

        let end = HEADER_LEN
            .checked_add(payload_len)
            .ok_or(PacketError::LengthMismatch)?;
        if buf.len() < end {
            return Err(PacketError::LengthMismatch);
        }
        if buf[end..].iter().any(|&b| b != 0) {
            return Err(PacketError::NonZeroPadding);
        }

        let mut scratch = buf[..end].to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());
        if internet_checksum(&scratch) != checksum {
            return Err(PacketError::ChecksumFailed);
        }

        Ok(Packet {
            id,
            payload: buf[HEADER_LEN..end].to_vec(),
        })
    }
}

/// Copy `N` bytes starting at `offset`. Callers check the length first.
fn read_array<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

/// Errors that can arise when parsing or building a datagram.
///
/// Any of these on the receive path means "malformed packet": the loops treat
/// it as if nothing had arrived.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too short to contain a header")]
    BufferTooShort,
    #[error("payload_len field exceeds the received bytes")]
    LengthMismatch,
    #[error("non-zero bytes after the payload")]
    NonZeroPadding,
    #[error("checksum verification failed")]
    ChecksumFailed,
    #[error("payload does not fit the length field")]
    PayloadTooLarge,
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// Sum consecutive 16-bit big-endian words, fold the carry, return the
/// one's-complement.  The caller must zero any checksum field within `data`
/// before calling this function.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u64 = 0;
    let mut words = data.chunks_exact(2);

    for w in &mut words {
        sum += u64::from(u16::from_be_bytes([w[0], w[1]]));
    }
    // Odd trailing byte, padded with a zero byte on the right.
    if let [last] = words.remainder() {
        sum += u64::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}
