//! SMPTE 336 KLV framing and local set parsing.
//!
//! ```text
//! +----------------------+-----------+------------------------------+
//! | Universal key        | BER len   | Local set: (tag, len, value)*|
//! | 16 bytes             | 1-9 bytes | ... ends with tag 1 checksum |
//! +----------------------+-----------+------------------------------+
//! ```

use crate::error::{KlvError, Result};

/// Universal key of the UAS Datalink Local Set.
pub const UAS_LOCAL_SET_KEY: [u8; 16] = [
    0x06, 0x0E, 0x2B, 0x34, 0x02, 0x0B, 0x01, 0x01, 0x0E, 0x01, 0x03, 0x01, 0x01, 0x00, 0x00,
    0x00,
];

/// Local set tag of the trailing checksum item.
pub const CHECKSUM_TAG: u32 = 1;

/// Decode a BER length, returning `(length, bytes consumed)`.
pub fn decode_ber_length(data: &[u8], offset: usize) -> Result<(usize, usize)> {
    let first = *data.get(offset).ok_or(KlvError::TruncatedBer(offset))?;
    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }

    let count = (first & 0x7F) as usize;
    if count == 0 || count > std::mem::size_of::<u32>() {
        return Err(KlvError::BerTooLong(count));
    }
    let bytes = data
        .get(offset + 1..offset + 1 + count)
        .ok_or(KlvError::TruncatedBer(offset))?;
    let length = bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Ok((length, 1 + count))
}

/// Decode a BER-OID encoded tag, returning `(tag, bytes consumed)`.
pub fn decode_ber_oid(data: &[u8], offset: usize) -> Result<(u32, usize)> {
    let mut tag: u32 = 0;
    for (i, &b) in data.iter().skip(offset).take(4).enumerate() {
        tag = (tag << 7) | (b & 0x7F) as u32;
        if b & 0x80 == 0 {
            return Ok((tag, i + 1));
        }
    }
    Err(KlvError::TruncatedBer(offset))
}

/// Encode a length in BER short or long form.
pub fn encode_ber_length(length: usize, out: &mut Vec<u8>) {
    if length < 0x80 {
        out.push(length as u8);
        return;
    }
    let bytes = (length as u32).to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    out.push(0x80 | (4 - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

/// Running 16-bit checksum over a whole unit, up to but excluding the
/// checksum value itself.
pub fn checksum(data: &[u8]) -> u16 {
    data.iter().enumerate().fold(0u16, |bcc, (i, &b)| {
        bcc.wrapping_add((b as u16) << (8 * ((i + 1) % 2)))
    })
}

/// One KLV unit found in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KlvUnit<'a> {
    /// The complete unit: key, length and value.
    pub bytes: &'a [u8],
    /// Value bytes only.
    pub value: &'a [u8],
}

impl<'a> KlvUnit<'a> {
    /// Parse the value as a local set and verify its checksum.
    pub fn local_set(&self) -> Result<Vec<LocalSetItem<'a>>> {
        let items = parse_local_set(self.value)?;
        let last = items.last().ok_or(KlvError::MissingChecksum)?;
        if last.tag != CHECKSUM_TAG || last.value.len() != 2 {
            return Err(KlvError::MissingChecksum);
        }

        let stored = u16::from_be_bytes([last.value[0], last.value[1]]);
        let computed = checksum(&self.bytes[..self.bytes.len() - 2]);
        if stored != computed {
            return Err(KlvError::ChecksumMismatch { computed, stored });
        }
        Ok(items)
    }
}

/// A single tag/value pair of a local set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSetItem<'a> {
    pub tag: u32,
    pub value: &'a [u8],
}

/// Split a local set value into its items.
pub fn parse_local_set(data: &[u8]) -> Result<Vec<LocalSetItem<'_>>> {
    let mut items = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (tag, tag_len) = decode_ber_oid(data, offset)?;
        offset += tag_len;
        let (len, len_len) = decode_ber_length(data, offset)?;
        offset += len_len;
        let value = data
            .get(offset..offset + len)
            .ok_or(KlvError::TruncatedItem { tag })?;
        items.push(LocalSetItem { tag, value });
        offset += len;
    }
    Ok(items)
}

/// Finds UAS local set units anywhere inside a buffer.
///
/// Metadata access unit headers and stuffing between units are skipped by
/// searching for the universal key. A unit whose length is unreadable or
/// runs past the buffer is reported as an error and scanning resumes just
/// after its key.
pub struct KlvScanner<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> KlvScanner<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn find_key(&self) -> Option<usize> {
        self.data
            .get(self.offset..)?
            .windows(UAS_LOCAL_SET_KEY.len())
            .position(|w| w == UAS_LOCAL_SET_KEY)
            .map(|pos| self.offset + pos)
    }
}

impl<'a> Iterator for KlvScanner<'a> {
    type Item = Result<KlvUnit<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.find_key()?;
        let length_offset = start + UAS_LOCAL_SET_KEY.len();

        let (length, length_len) = match decode_ber_length(self.data, length_offset) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.offset = length_offset;
                return Some(Err(e));
            }
        };

        let value_start = length_offset + length_len;
        let end = value_start + length;
        if end > self.data.len() {
            self.offset = length_offset;
            return Some(Err(KlvError::TruncatedUnit {
                expected: length,
                actual: self.data.len() - value_start,
            }));
        }

        self.offset = end;
        Some(Ok(KlvUnit {
            bytes: &self.data[start..end],
            value: &self.data[value_start..end],
        }))
    }
}
