//! MPEG-TS packet parsing and datagram alignment.
//!
//! UDP senders are free to split the transport stream anywhere, so the
//! [`PacketAligner`] carries partial packets across datagrams and hands out
//! whole 188-byte packets.

use bytes::{Buf, BytesMut};

use crate::error::{KlvError, Result};

/// TS packet size in bytes.
pub const TS_PACKET_SIZE: usize = 188;

/// TS sync byte (0x47).
pub const SYNC_BYTE: u8 = 0x47;

/// Null packet PID.
pub const NULL_PID: u16 = 0x1FFF;

/// Parsed TS packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    /// Transport error indicator.
    pub transport_error: bool,
    /// Payload unit start indicator.
    pub payload_unit_start: bool,
    /// Packet Identifier (13 bits).
    pub pid: u16,
    /// Transport scrambling control (2 bits).
    pub scrambling_control: u8,
    /// Adaptation field control (2 bits).
    pub adaptation_field_control: u8,
    /// Continuity counter (4 bits).
    pub continuity_counter: u8,
}

impl TsHeader {
    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0x02 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }

    pub fn is_scrambled(&self) -> bool {
        self.scrambling_control != 0
    }
}

/// A parsed TS packet borrowing its payload from the input buffer.
#[derive(Debug, Clone)]
pub struct TsPacket<'a> {
    pub header: TsHeader,
    /// Discontinuity indicator from the adaptation field.
    pub discontinuity: bool,
    pub payload: &'a [u8],
}

impl<'a> TsPacket<'a> {
    /// Parse a TS packet from the first 188 bytes of `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < TS_PACKET_SIZE {
            return Err(KlvError::InvalidPacket("Packet too short"));
        }

        if data[0] != SYNC_BYTE {
            return Err(KlvError::InvalidPacket("Invalid sync byte"));
        }

        let header = TsHeader {
            transport_error: data[1] & 0x80 != 0,
            payload_unit_start: data[1] & 0x40 != 0,
            pid: ((data[1] as u16 & 0x1F) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_control: (data[3] >> 4) & 0x03,
            continuity_counter: data[3] & 0x0F,
        };

        let mut offset = 4;
        let mut discontinuity = false;
        if header.has_adaptation_field() {
            let af_length = data[4] as usize;
            offset = 5 + af_length;
            if offset > TS_PACKET_SIZE {
                return Err(KlvError::InvalidPacket("Adaptation field overflows packet"));
            }
            if af_length > 0 {
                discontinuity = data[5] & 0x80 != 0;
            }
        }

        let payload = if header.has_payload() && offset < TS_PACKET_SIZE {
            &data[offset..TS_PACKET_SIZE]
        } else {
            &[]
        };

        Ok(TsPacket {
            header,
            discontinuity,
            payload,
        })
    }
}

/// Iterator over TS packets in a contiguous byte buffer.
pub struct TsPacketIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> TsPacketIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let offset = data
            .iter()
            .position(|&b| b == SYNC_BYTE)
            .unwrap_or(data.len());
        Self { data, offset }
    }

    fn resync(&mut self) {
        self.offset += 1;
        while self.offset < self.data.len() && self.data[self.offset] != SYNC_BYTE {
            self.offset += 1;
        }
    }
}

impl<'a> Iterator for TsPacketIterator<'a> {
    type Item = TsPacket<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset + TS_PACKET_SIZE <= self.data.len() {
            if self.data[self.offset] != SYNC_BYTE {
                self.resync();
                continue;
            }

            match TsPacket::parse(&self.data[self.offset..]) {
                Ok(packet) => {
                    self.offset += TS_PACKET_SIZE;
                    return Some(packet);
                }
                Err(_) => self.resync(),
            }
        }
        None
    }
}

/// Reassembles whole TS packets from arbitrarily split datagrams.
///
/// Once synchronized, every datagram must continue exactly where the last
/// packet boundary left off. A datagram that does not is rejected and the
/// aligner falls back to hunting for the next sync byte.
#[derive(Debug, Default)]
pub struct PacketAligner {
    pending: BytesMut,
    synced: bool,
}

impl PacketAligner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the next datagram is expected on a known packet boundary.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Bytes of a partial packet carried over to the next datagram.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Accept a datagram, calling `sink` for each completed packet.
    ///
    /// Returns the number of packets emitted. A rejected datagram leaves no
    /// trace in the aligner apart from losing sync.
    pub fn push<F>(&mut self, datagram: &[u8], mut sink: F) -> Result<usize>
    where
        F: FnMut(&[u8]),
    {
        if datagram.is_empty() {
            return Err(KlvError::EmptyDatagram);
        }

        if self.synced {
            let offset = (TS_PACKET_SIZE - self.pending.len()) % TS_PACKET_SIZE;
            if offset < datagram.len() && datagram[offset] != SYNC_BYTE {
                let found = datagram[offset];
                self.reset();
                return Err(KlvError::Misaligned { offset, found });
            }
        }

        self.pending.extend_from_slice(datagram);

        let mut emitted = 0;
        loop {
            if !self.pending.is_empty() && self.pending[0] != SYNC_BYTE {
                match self.pending.iter().position(|&b| b == SYNC_BYTE) {
                    Some(pos) => self.pending.advance(pos),
                    None => {
                        self.pending.clear();
                        break;
                    }
                }
            }
            if self.pending.len() < TS_PACKET_SIZE {
                break;
            }
            let packet = self.pending.split_to(TS_PACKET_SIZE);
            sink(&packet);
            emitted += 1;
        }

        self.synced = emitted > 0 || !self.pending.is_empty();
        Ok(emitted)
    }

    /// Drop any partial packet and forget the current alignment.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.synced = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(pid: u16, cc: u8) -> [u8; TS_PACKET_SIZE] {
        let mut p = [0xFFu8; TS_PACKET_SIZE];
        p[0] = SYNC_BYTE;
        p[1] = ((pid >> 8) & 0x1F) as u8;
        p[2] = (pid & 0xFF) as u8;
        p[3] = 0x10 | (cc & 0x0F);
        p
    }

    #[test]
    fn test_parse_null_packet() {
        let raw = packet(NULL_PID, 0);
        let parsed = TsPacket::parse(&raw).unwrap();
        assert_eq!(parsed.header.pid, NULL_PID);
        assert!(parsed.header.has_payload());
        assert!(!parsed.header.has_adaptation_field());
        assert_eq!(parsed.payload.len(), 184);
    }

    #[test]
    fn test_adaptation_field_discontinuity() {
        let mut p = packet(0x100, 3);
        p[3] = 0x30 | 3;
        p[4] = 7;
        p[5] = 0x80;

        let parsed = TsPacket::parse(&p).unwrap();
        assert!(parsed.discontinuity);
        assert_eq!(parsed.payload.len(), TS_PACKET_SIZE - 12);
    }

    #[test]
    fn test_adaptation_field_overflow() {
        let mut p = packet(0x100, 0);
        p[3] = 0x30;
        p[4] = 200;
        assert!(TsPacket::parse(&p).is_err());
    }

    #[test]
    fn test_invalid_sync_byte() {
        let mut p = packet(0x100, 0);
        p[0] = 0x00;
        assert!(TsPacket::parse(&p).is_err());
    }

    #[test]
    fn test_iterator_resyncs_after_garbage() {
        let mut data = vec![0x00, 0x01, 0x02];
        data.extend_from_slice(&packet(0x100, 0));
        data.extend_from_slice(&packet(0x100, 1));

        let pids: Vec<u8> = TsPacketIterator::new(&data)
            .map(|p| p.header.continuity_counter)
            .collect();
        assert_eq!(pids, vec![0, 1]);
    }

    #[test]
    fn test_aligner_reassembles_split_packets() {
        let mut stream = Vec::new();
        for cc in 0..4 {
            stream.extend_from_slice(&packet(0x100, cc));
        }

        let mut aligner = PacketAligner::new();
        let mut seen = Vec::new();
        for chunk in stream.chunks(100) {
            aligner
                .push(chunk, |p| seen.push(p[3] & 0x0F))
                .unwrap();
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(aligner.pending_len(), 0);
        assert!(aligner.is_synced());
    }

    #[test]
    fn test_aligner_rejects_empty_datagram() {
        let mut aligner = PacketAligner::new();
        assert_eq!(aligner.push(&[], |_| {}), Err(KlvError::EmptyDatagram));
    }

    #[test]
    fn test_aligner_rejects_misaligned_datagram() {
        let mut aligner = PacketAligner::new();
        let first = packet(0x100, 0);
        aligner.push(&first[..100], |_| {}).unwrap();

        let mut bad = [0u8; 188];
        bad[88] = 0x00;
        let err = aligner.push(&bad, |_| {}).unwrap_err();
        assert_eq!(err, KlvError::Misaligned { offset: 88, found: 0x00 });
        assert!(!aligner.is_synced());

        let mut count = 0;
        aligner.push(&packet(0x100, 1), |_| count += 1).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_aligner_hunts_for_sync_when_unsynced() {
        let mut data = vec![0x12, 0x34];
        data.extend_from_slice(&packet(0x100, 5));

        let mut aligner = PacketAligner::new();
        let mut ccs = Vec::new();
        aligner.push(&data, |p| ccs.push(p[3] & 0x0F)).unwrap();
        assert_eq!(ccs, vec![5]);
    }
}
