//! Error types for transport stream and KLV decoding.

use thiserror::Error;

/// Errors raised while aligning, parsing or decoding stream data.
///
/// None of these are fatal to a running monitor: the offending datagram,
/// packet or KLV unit is dropped and decoding continues with the next one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KlvError {
    /// A zero-length datagram was received.
    #[error("Empty datagram")]
    EmptyDatagram,

    /// A datagram does not continue on a TS packet boundary.
    #[error("Datagram misaligned: expected sync byte at offset {offset}, found 0x{found:02X}")]
    Misaligned { offset: usize, found: u8 },

    /// TS packet header could not be parsed.
    #[error("Invalid TS packet: {0}")]
    InvalidPacket(&'static str),

    /// BER length or tag runs past the end of the buffer.
    #[error("Truncated BER field at offset {0}")]
    TruncatedBer(usize),

    /// BER long-form length uses more bytes than supported.
    #[error("BER length of {0} bytes is not supported")]
    BerTooLong(usize),

    /// KLV unit declares more value bytes than are available.
    #[error("Truncated KLV unit: expected {expected} bytes, got {actual}")]
    TruncatedUnit { expected: usize, actual: usize },

    /// Local set item runs past the end of the set.
    #[error("Truncated local set item: tag {tag}")]
    TruncatedItem { tag: u32 },

    /// The local set carries no checksum item.
    #[error("Missing checksum")]
    MissingChecksum,

    /// Checksum does not match the unit contents.
    #[error("Checksum mismatch: computed 0x{computed:04X}, stored 0x{stored:04X}")]
    ChecksumMismatch { computed: u16, stored: u16 },
}

pub type Result<T> = std::result::Result<T, KlvError>;
