//! PES reassembly for metadata-bearing elementary streams.
//!
//! Only private stream 1 (0xBD, asynchronous KLV) and metadata stream
//! (0xFC, synchronous KLV) payloads are collected. Video and audio PIDs are
//! looked at once per unit start and then skipped.

use std::collections::HashMap;

use crate::packet::{TsPacket, NULL_PID};

/// PES stream IDs that carry KLV metadata.
pub mod stream_id {
    pub const PRIVATE_STREAM_1: u8 = 0xBD;
    pub const METADATA_STREAM: u8 = 0xFC;
}

/// Minimum PES header: start code (3), stream id (1), length (2), flags (2), header length (1).
const PES_HEADER_MIN: usize = 9;

/// A completed PES payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesUnit {
    pub pid: u16,
    pub stream_id: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct PesBuffer {
    stream_id: u8,
    data: Vec<u8>,
    expected_length: Option<usize>,
    continuity_counter: Option<u8>,
}

impl PesBuffer {
    fn is_complete(&self) -> bool {
        matches!(self.expected_length, Some(len) if self.data.len() >= len)
    }

    fn into_unit(mut self, pid: u16) -> PesUnit {
        if let Some(len) = self.expected_length {
            self.data.truncate(len);
        }
        PesUnit {
            pid,
            stream_id: self.stream_id,
            payload: self.data,
        }
    }
}

/// Collects metadata PES payloads across TS packets.
#[derive(Debug, Default)]
pub struct PesAssembler {
    buffers: HashMap<u16, PesBuffer>,
    /// Units dropped because of a continuity gap.
    discarded: u64,
}

impl PesAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of partial units dropped on continuity errors.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Feed one packet, calling `sink` for every PES unit it completes.
    pub fn push<F>(&mut self, packet: &TsPacket<'_>, mut sink: F)
    where
        F: FnMut(PesUnit),
    {
        let header = &packet.header;
        if header.transport_error
            || header.is_scrambled()
            || header.pid == NULL_PID
            || packet.payload.is_empty()
        {
            return;
        }

        let pid = header.pid;
        let cc = header.continuity_counter;

        if header.payload_unit_start {
            // An unbounded unit ends where the next one starts.
            if let Some(previous) = self.buffers.remove(&pid) {
                if !previous.data.is_empty() {
                    sink(previous.into_unit(pid));
                }
            }

            if let Some(buffer) = Self::start_unit(packet.payload, cc) {
                if buffer.is_complete() {
                    sink(buffer.into_unit(pid));
                } else {
                    self.buffers.insert(pid, buffer);
                }
            }
            return;
        }

        let Some(buffer) = self.buffers.get_mut(&pid) else {
            return;
        };

        if let Some(last_cc) = buffer.continuity_counter {
            if cc == last_cc {
                // Duplicate packet
                return;
            }
            if cc != (last_cc + 1) & 0x0F && !packet.discontinuity {
                self.buffers.remove(&pid);
                self.discarded += 1;
                return;
            }
        }
        buffer.continuity_counter = Some(cc);
        buffer.data.extend_from_slice(packet.payload);

        if buffer.is_complete() {
            if let Some(done) = self.buffers.remove(&pid) {
                sink(done.into_unit(pid));
            }
        }
    }

    /// Emit every unit still being collected.
    pub fn flush<F>(&mut self, mut sink: F)
    where
        F: FnMut(PesUnit),
    {
        for (pid, buffer) in self.buffers.drain() {
            if !buffer.data.is_empty() {
                sink(buffer.into_unit(pid));
            }
        }
    }

    fn start_unit(payload: &[u8], cc: u8) -> Option<PesBuffer> {
        if payload.len() < PES_HEADER_MIN || payload[..3] != [0x00, 0x00, 0x01] {
            return None;
        }

        let stream_id = payload[3];
        if stream_id != stream_id::PRIVATE_STREAM_1 && stream_id != stream_id::METADATA_STREAM {
            return None;
        }

        let packet_length = u16::from_be_bytes([payload[4], payload[5]]) as usize;
        let header_data_length = payload[8] as usize;
        let data_start = PES_HEADER_MIN + header_data_length;
        if data_start > payload.len() {
            return None;
        }

        // packet_length counts everything after the length field itself
        let expected_length = if packet_length == 0 {
            None
        } else {
            Some(packet_length.saturating_sub(3 + header_data_length))
        };

        Some(PesBuffer {
            stream_id,
            data: payload[data_start..].to_vec(),
            expected_length,
            continuity_counter: Some(cc),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{SYNC_BYTE, TS_PACKET_SIZE};

    /// Build TS packets carrying one PES unit, padded with adaptation stuffing.
    fn packetize(pid: u16, stream: u8, body: &[u8], bounded: bool) -> Vec<[u8; TS_PACKET_SIZE]> {
        let mut pes = vec![0x00, 0x00, 0x01, stream];
        let length = if bounded { (body.len() + 3) as u16 } else { 0 };
        pes.extend_from_slice(&length.to_be_bytes());
        pes.extend_from_slice(&[0x80, 0x00, 0x00]);
        pes.extend_from_slice(body);

        pes.chunks(184)
            .enumerate()
            .map(|(i, part)| {
                let mut p = [0xFFu8; TS_PACKET_SIZE];
                p[0] = SYNC_BYTE;
                p[1] = ((pid >> 8) as u8 & 0x1F) | if i == 0 { 0x40 } else { 0 };
                p[2] = pid as u8;
                let stuffing = 184 - part.len();
                if stuffing == 0 {
                    p[3] = 0x10 | (i as u8 & 0x0F);
                    p[4..].copy_from_slice(part);
                } else {
                    p[3] = 0x30 | (i as u8 & 0x0F);
                    p[4] = (stuffing - 1) as u8;
                    if stuffing > 1 {
                        p[5] = 0x00;
                    }
                    p[4 + stuffing..].copy_from_slice(part);
                }
                p
            })
            .collect()
    }

    fn collect(assembler: &mut PesAssembler, packets: &[[u8; TS_PACKET_SIZE]]) -> Vec<PesUnit> {
        let mut units = Vec::new();
        for p in packets {
            let parsed = TsPacket::parse(p).unwrap();
            assembler.push(&parsed, |u| units.push(u));
        }
        units
    }

    #[test]
    fn test_bounded_unit_spanning_packets() {
        let body: Vec<u8> = (0..400u32).map(|i| i as u8).collect();
        let packets = packetize(0x101, stream_id::PRIVATE_STREAM_1, &body, true);
        assert_eq!(packets.len(), 3);

        let mut assembler = PesAssembler::new();
        let units = collect(&mut assembler, &packets);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].payload, body);
        assert_eq!(units[0].pid, 0x101);
    }

    #[test]
    fn test_unbounded_unit_ends_at_next_start() {
        let body = vec![0xAB; 50];
        let mut packets = packetize(0x102, stream_id::METADATA_STREAM, &body, false);
        packets.extend(packetize(0x102, stream_id::METADATA_STREAM, &body, false));
        // keep the continuity counter moving
        packets[1][3] = (packets[1][3] & 0xF0) | 0x01;

        let mut assembler = PesAssembler::new();
        let units = collect(&mut assembler, &packets);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].payload, body);

        let mut rest = Vec::new();
        assembler.flush(|u| rest.push(u));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_video_stream_ignored() {
        let packets = packetize(0x100, 0xE0, &[0u8; 300], true);
        let mut assembler = PesAssembler::new();
        assert!(collect(&mut assembler, &packets).is_empty());
    }

    #[test]
    fn test_continuity_gap_discards_unit() {
        let body = vec![0x11; 500];
        let mut packets = packetize(0x101, stream_id::PRIVATE_STREAM_1, &body, true);
        packets.remove(1);

        let mut assembler = PesAssembler::new();
        assert!(collect(&mut assembler, &packets).is_empty());
        assert_eq!(assembler.discarded(), 1);
    }
}
