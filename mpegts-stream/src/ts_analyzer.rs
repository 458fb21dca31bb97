//! TS packet quality analyzer.

use std::collections::HashMap;

use serde::Serialize;
use stream_klv::packet::NULL_PID;
use stream_klv::TsPacket;

/// Quality counters for one monitored stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TsStreamQuality {
    pub packets_total: u64,
    /// Continuity counter gaps.
    pub packets_dropped: u64,
    pub packets_scrambled: u64,
    pub packets_error: u64,
}

/// Tracks continuity counters per PID.
#[derive(Debug, Default)]
pub struct TsPacketAnalyzer {
    last_cc: HashMap<u16, u8>,
    quality: TsStreamQuality,
}

impl TsPacketAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one packet. Returns true when a gap was detected.
    pub fn observe(&mut self, packet: &TsPacket<'_>) -> bool {
        let header = &packet.header;
        self.quality.packets_total += 1;

        if header.transport_error {
            self.quality.packets_error += 1;
        }
        if header.is_scrambled() {
            self.quality.packets_scrambled += 1;
        }
        if header.pid == NULL_PID || !header.has_payload() {
            return false;
        }

        let cc = header.continuity_counter;
        let expected = self.last_cc.insert(header.pid, cc).map(|last| (last + 1) & 0x0F);
        let gap = matches!(expected, Some(e) if e != cc) && !packet.discontinuity;
        if gap {
            self.quality.packets_dropped += 1;
        }
        gap
    }

    pub fn snapshot(&self) -> TsStreamQuality {
        self.quality
    }

    pub fn reset(&mut self) {
        self.quality = TsStreamQuality::default();
        self.last_cc.clear();
    }
}
