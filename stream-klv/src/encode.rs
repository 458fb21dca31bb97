//! Encoders for generating UAS local sets and carrying them in TS packets.
//!
//! These are the inverse of the decoders and are meant for producing test
//! traffic; they do not cover every tag.

use crate::klv::{checksum, encode_ber_length, CHECKSUM_TAG, UAS_LOCAL_SET_KEY};
use crate::packet::{SYNC_BYTE, TS_PACKET_SIZE};
use crate::pes::stream_id;

/// Build a complete UAS local set unit, appending a valid checksum item.
pub fn build_local_set(items: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut value = Vec::new();
    for (tag, bytes) in items {
        encode_ber_oid(*tag, &mut value);
        encode_ber_length(bytes.len(), &mut value);
        value.extend_from_slice(bytes);
    }
    value.extend_from_slice(&[CHECKSUM_TAG as u8, 2]);

    let mut unit = UAS_LOCAL_SET_KEY.to_vec();
    encode_ber_length(value.len() + 2, &mut unit);
    unit.extend_from_slice(&value);
    let crc = checksum(&unit);
    unit.extend_from_slice(&crc.to_be_bytes());
    unit
}

/// Encode a tag as BER-OID.
pub fn encode_ber_oid(tag: u32, out: &mut Vec<u8>) {
    let mut groups = vec![(tag & 0x7F) as u8];
    let mut rest = tag >> 7;
    while rest != 0 {
        groups.push(0x80 | (rest & 0x7F) as u8);
        rest >>= 7;
    }
    out.extend(groups.iter().rev());
}

pub fn latitude(deg: f64) -> Vec<u8> {
    ((deg * 4_294_967_294.0 / 180.0).round() as i32)
        .to_be_bytes()
        .to_vec()
}

pub fn longitude(deg: f64) -> Vec<u8> {
    ((deg * 4_294_967_294.0 / 360.0).round() as i32)
        .to_be_bytes()
        .to_vec()
}

pub fn altitude(meters: f64) -> Vec<u8> {
    (((meters + 900.0) * 65535.0 / 19_900.0).round() as u16)
        .to_be_bytes()
        .to_vec()
}

pub fn corner_offset(deg: f64) -> Vec<u8> {
    ((deg * 65534.0 / 0.15).round() as i16).to_be_bytes().to_vec()
}

/// Microseconds since the Unix epoch.
pub fn timestamp(micros: u64) -> Vec<u8> {
    micros.to_be_bytes().to_vec()
}

/// Wrap KLV bytes in one bounded private-stream PES unit split across TS
/// packets on `pid`, with continuity counters starting at `first_cc`.
pub fn klv_pes_packets(pid: u16, klv: &[u8], first_cc: u8) -> Vec<u8> {
    let mut pes = vec![0x00, 0x00, 0x01, stream_id::PRIVATE_STREAM_1];
    pes.extend_from_slice(&((klv.len() + 3) as u16).to_be_bytes());
    pes.extend_from_slice(&[0x80, 0x00, 0x00]);
    pes.extend_from_slice(klv);

    let mut out = Vec::with_capacity(TS_PACKET_SIZE * (pes.len() / 184 + 1));
    for (i, part) in pes.chunks(184).enumerate() {
        let mut p = [0xFFu8; TS_PACKET_SIZE];
        p[0] = SYNC_BYTE;
        p[1] = ((pid >> 8) as u8 & 0x1F) | if i == 0 { 0x40 } else { 0 };
        p[2] = pid as u8;
        let cc = (first_cc.wrapping_add(i as u8)) & 0x0F;
        // Short final parts are padded with adaptation field stuffing.
        let stuffing = 184 - part.len();
        if stuffing == 0 {
            p[3] = 0x10 | cc;
            p[4..].copy_from_slice(part);
        } else {
            p[3] = 0x30 | cc;
            p[4] = (stuffing - 1) as u8;
            if stuffing > 1 {
                p[5] = 0x00;
            }
            p[4 + stuffing..].copy_from_slice(part);
        }
        out.extend_from_slice(&p);
    }
    out
}

/// A null packet, used as filler.
pub fn null_packet() -> [u8; TS_PACKET_SIZE] {
    let mut p = [0xFFu8; TS_PACKET_SIZE];
    p[..4].copy_from_slice(&[SYNC_BYTE, 0x1F, 0xFF, 0x10]);
    p
}
