//! Wire-format definitions for the two link-layer record types.
//!
//! Every record moved through a [`crate::ring::RingChannel`] is
//! serialised by this module.  It is responsible for:
//! - Defining the on-wire binary layout of [`TransportUnit`] and
//!   [`Frame`] (fixed fields first, then a length-prefixed payload).
//! - Serialising records into byte vectors ready for a ring or the medium.
//! - Deserialising raw byte slices back into records, returning errors
//!   for malformed or truncated input.
//! - Probing a (possibly wrapped) byte window for a complete record
//!   *without consuming it*, so a ring can tell whether one full record
//!   has arrived and how many bytes it occupies.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.  Both record types follow
//! the same shape: a fixed-size field block in declaration order, then
//! the variable payload encoded as a 4-byte length immediately followed
//! by that many bytes.  The fixed block having a constant size is
//! load-bearing: [`Wire::probe`] locates the length prefix at a known
//! offset before the full record has arrived.
//!
//! ```text
//! TransportUnit (fixed block 16 bytes):
//!   dest(6) src(6) number(2) count(2) | data_len(4) data(data_len)
//!
//! Frame (fixed block 20 bytes):
//!   dest(6) src(6) ack(2) seq(2) size(4) | data_len(4) data(data_len)
//! ```
//!
//! The `size` field of a [`Frame`] is overloaded: values below
//! [`DATA_SIZE_LIMIT`] are the payload byte count of a DATA frame; the
//! two sentinels [`SIZE_ACK`] and [`SIZE_NAK`] above the limit mark pure
//! control frames carrying no data.

use std::fmt;

use crate::addr::MacAddr;
use crate::seq::SeqNum;

/// `size` values below this are DATA byte counts; at or above, sentinels.
pub const DATA_SIZE_LIMIT: u32 = 1500;

/// `size` sentinel for a pure acknowledgement frame.
pub const SIZE_ACK: u32 = 0x601;

/// `size` sentinel for a pure negative-acknowledgement frame.
pub const SIZE_NAK: u32 = 0x602;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can arise when decoding a raw record.
#[derive(Debug, PartialEq, Eq)]
pub enum WireError {
    /// Buffer shorter than the record's fixed block plus length prefix.
    Truncated,
    /// The length prefix disagrees with the remaining buffer bytes.
    LengthMismatch,
    /// A frame's size field is neither a DATA length nor a known sentinel.
    UnknownSizeTag,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated => write!(f, "buffer too short for record"),
            WireError::LengthMismatch => {
                write!(f, "length prefix does not match remaining bytes")
            }
            WireError::UnknownSizeTag => write!(f, "unrecognised frame size tag"),
        }
    }
}

impl std::error::Error for WireError {}

// ---------------------------------------------------------------------------
// ByteWindow — a possibly wrapping read-only view into ring storage
// ---------------------------------------------------------------------------

/// A contiguous-looking view of `len` bytes starting at `start` inside a
/// circular buffer of `storage.len()` capacity.
///
/// Indexing wraps modulo the capacity, so a record that straddles the
/// physical end of the ring reads the same as one that does not.
pub struct ByteWindow<'a> {
    storage: &'a [u8],
    start: usize,
    len: usize,
}

impl<'a> ByteWindow<'a> {
    pub fn new(storage: &'a [u8], start: usize, len: usize) -> Self {
        debug_assert!(len <= storage.len());
        Self { storage, start, len }
    }

    /// Number of readable bytes in the window.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte at logical offset `i`, or `None` past the end of the window.
    pub fn get(&self, i: usize) -> Option<u8> {
        if i < self.len {
            Some(self.storage[(self.start + i) % self.storage.len()])
        } else {
            None
        }
    }

    /// Big-endian `u32` at logical offset `at`, if all four bytes are in.
    pub fn read_u32(&self, at: usize) -> Option<u32> {
        let b = [
            self.get(at)?,
            self.get(at + 1)?,
            self.get(at + 2)?,
            self.get(at + 3)?,
        ];
        Some(u32::from_be_bytes(b))
    }
}

// ---------------------------------------------------------------------------
// Wire — the codec contract
// ---------------------------------------------------------------------------

/// Serialisation contract shared by every record a ring can carry.
///
/// `probe` must return `Some(n)` exactly when the window's first `n`
/// bytes form one complete record, and `None` for every strict prefix —
/// including the case where the payload length prefix itself has not
/// fully arrived.
pub trait Wire: Sized {
    /// Exact number of bytes [`encode`](Wire::encode) will produce.
    fn encoded_len(&self) -> usize;

    /// Append the wire form of `self` to `out`.
    fn encode_into(&self, out: &mut Vec<u8>);

    /// Serialise into a newly allocated byte vector.
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Parse one record from `buf`, which must contain exactly one record.
    fn decode(buf: &[u8]) -> Result<Self, WireError>;

    /// Size of one complete record at the front of `win`, without
    /// consuming anything; `None` while bytes are still missing.
    fn probe(win: &ByteWindow<'_>) -> Option<usize>;
}

fn read_be_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn read_be_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

// ---------------------------------------------------------------------------
// Payload — length-prefixed owned bytes
// ---------------------------------------------------------------------------

/// An owned variable-length byte buffer, encoded as a 4-byte big-endian
/// length immediately followed by the bytes.
///
/// This is both the trailing field of the two record types and the unit
/// the physical/medium byte paths move on their own rings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload(bytes)
    }
}

impl Wire for Payload {
    fn encoded_len(&self) -> usize {
        4 + self.0.len()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.0.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.0);
    }

    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < 4 {
            return Err(WireError::Truncated);
        }
        let declared = read_be_u32(buf, 0) as usize;
        if buf.len() != 4 + declared {
            return Err(WireError::LengthMismatch);
        }
        Ok(Payload(buf[4..].to_vec()))
    }

    fn probe(win: &ByteWindow<'_>) -> Option<usize> {
        let declared = win.read_u32(0)? as usize;
        let total = 4 + declared;
        if win.len() >= total {
            Some(total)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// TransportUnit
// ---------------------------------------------------------------------------

/// One network-layer record: a slice of a file in flight.
///
/// `count` is the number of meaningful bytes in `data` — the final unit
/// of a transfer is padded up to the session packet size, and `count`
/// tells the reassembler where the real bytes end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportUnit {
    pub dest: MacAddr,
    pub src: MacAddr,
    pub number: SeqNum,
    pub count: u16,
    pub data: Payload,
}

impl TransportUnit {
    /// Size of the fixed field block: dest(6) + src(6) + number(2) + count(2).
    pub const FIXED_LEN: usize = 16;
}

impl Wire for TransportUnit {
    fn encoded_len(&self) -> usize {
        Self::FIXED_LEN + self.data.encoded_len()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.dest.octets());
        out.extend_from_slice(&self.src.octets());
        out.extend_from_slice(&self.number.to_be_bytes());
        out.extend_from_slice(&self.count.to_be_bytes());
        self.data.encode_into(out);
    }

    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::FIXED_LEN + 4 {
            return Err(WireError::Truncated);
        }
        let mut dest = [0u8; 6];
        let mut src = [0u8; 6];
        dest.copy_from_slice(&buf[0..6]);
        src.copy_from_slice(&buf[6..12]);
        let number = read_be_u16(buf, 12);
        let count = read_be_u16(buf, 14);
        let data = Payload::decode(&buf[Self::FIXED_LEN..])?;
        Ok(TransportUnit {
            dest: MacAddr(dest),
            src: MacAddr(src),
            number,
            count,
            data,
        })
    }

    fn probe(win: &ByteWindow<'_>) -> Option<usize> {
        let declared = win.read_u32(Self::FIXED_LEN)? as usize;
        let total = Self::FIXED_LEN + 4 + declared;
        if win.len() >= total {
            Some(total)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// What a [`Frame`] carries, derived from its overloaded `size` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Carries `len` payload bytes (a packed [`TransportUnit`]).
    Data(u32),
    /// Pure acknowledgement; `ack` holds the acknowledged sequence number.
    Ack,
    /// Pure negative acknowledgement; `ack` holds the rejected sequence
    /// number to resend.
    Nak,
}

/// The unit exchanged between link-layer engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub dest: MacAddr,
    pub src: MacAddr,
    /// Piggybacked cumulative acknowledgement for DATA frames; the
    /// acknowledged / rejected sequence number for pure ACK / NAK frames.
    pub ack: SeqNum,
    pub seq: SeqNum,
    /// Overloaded size/type tag — see [`FrameKind`].
    pub size: u32,
    pub data: Payload,
}

impl Frame {
    /// Size of the fixed field block: dest(6) + src(6) + ack(2) + seq(2) + size(4).
    pub const FIXED_LEN: usize = 20;

    /// Build a DATA frame around an already-packed transport unit.
    pub fn data(dest: MacAddr, src: MacAddr, ack: SeqNum, seq: SeqNum, data: Payload) -> Self {
        debug_assert!((data.len() as u32) < DATA_SIZE_LIMIT);
        Frame {
            dest,
            src,
            ack,
            seq,
            size: data.len() as u32,
            data,
        }
    }

    /// Build a pure acknowledgement frame for `ack`.
    pub fn ack(dest: MacAddr, src: MacAddr, ack: SeqNum) -> Self {
        Frame {
            dest,
            src,
            ack,
            seq: 0,
            size: SIZE_ACK,
            data: Payload::default(),
        }
    }

    /// Build a pure negative-acknowledgement frame for `nak`.
    pub fn nak(dest: MacAddr, src: MacAddr, nak: SeqNum) -> Self {
        Frame {
            dest,
            src,
            ack: nak,
            seq: 0,
            size: SIZE_NAK,
            data: Payload::default(),
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self.size {
            SIZE_ACK => FrameKind::Ack,
            SIZE_NAK => FrameKind::Nak,
            n => FrameKind::Data(n),
        }
    }
}

impl Wire for Frame {
    fn encoded_len(&self) -> usize {
        Self::FIXED_LEN + self.data.encoded_len()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.dest.octets());
        out.extend_from_slice(&self.src.octets());
        out.extend_from_slice(&self.ack.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.size.to_be_bytes());
        self.data.encode_into(out);
    }

    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::FIXED_LEN + 4 {
            return Err(WireError::Truncated);
        }
        let mut dest = [0u8; 6];
        let mut src = [0u8; 6];
        dest.copy_from_slice(&buf[0..6]);
        src.copy_from_slice(&buf[6..12]);
        let ack = read_be_u16(buf, 12);
        let seq = read_be_u16(buf, 14);
        let size = read_be_u32(buf, 16);
        let data = Payload::decode(&buf[Self::FIXED_LEN..])?;
        match size {
            // Control frames carry no payload.
            SIZE_ACK | SIZE_NAK => {
                if !data.is_empty() {
                    return Err(WireError::LengthMismatch);
                }
            }
            // A DATA frame's tag must agree with its actual payload length.
            n if n < DATA_SIZE_LIMIT => {
                if n as usize != data.len() {
                    return Err(WireError::LengthMismatch);
                }
            }
            _ => return Err(WireError::UnknownSizeTag),
        }
        Ok(Frame {
            dest: MacAddr(dest),
            src: MacAddr(src),
            ack,
            seq,
            size,
            data,
        })
    }

    fn probe(win: &ByteWindow<'_>) -> Option<usize> {
        let declared = win.read_u32(Self::FIXED_LEN)? as usize;
        let total = Self::FIXED_LEN + 4 + declared;
        if win.len() >= total {
            Some(total)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
