//! Incremental telemetry extraction from TS packets.

use std::collections::VecDeque;

use log::debug;

use crate::klv::KlvScanner;
use crate::packet::{TsPacket, TsPacketIterator};
use crate::pes::{PesAssembler, PesUnit};
use crate::telemetry::TelemetrySample;

/// Counters kept by a [`KlvExtractor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractorStats {
    pub packets: u64,
    pub pes_units: u64,
    pub units_decoded: u64,
    pub units_skipped: u64,
}

/// Turns a packet stream into telemetry samples.
///
/// Each KLV unit is decoded exactly once, when the PES unit carrying it
/// completes. Malformed units are skipped and counted.
#[derive(Debug, Default)]
pub struct KlvExtractor {
    pes: PesAssembler,
    stats: ExtractorStats,
}

impl KlvExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ExtractorStats {
        self.stats
    }

    /// Feed one 188-byte packet, appending any completed samples to `out`.
    pub fn push_packet(&mut self, packet: &[u8], out: &mut Vec<TelemetrySample>) {
        match TsPacket::parse(packet) {
            Ok(parsed) => self.push_parsed(&parsed, out),
            Err(e) => debug!("Skipping packet: {}", e),
        }
    }

    pub fn push_parsed(&mut self, packet: &TsPacket<'_>, out: &mut Vec<TelemetrySample>) {
        self.stats.packets += 1;
        let stats = &mut self.stats;
        self.pes.push(packet, |unit| decode_unit(&unit, stats, out));
    }

    /// Decode whatever PES units are still open.
    pub fn finish(&mut self, out: &mut Vec<TelemetrySample>) {
        let stats = &mut self.stats;
        self.pes.flush(|unit| decode_unit(&unit, stats, out));
    }
}

fn decode_unit(unit: &PesUnit, stats: &mut ExtractorStats, out: &mut Vec<TelemetrySample>) {
    stats.pes_units += 1;
    for scanned in KlvScanner::new(&unit.payload) {
        match scanned.and_then(|klv| TelemetrySample::decode(&klv)) {
            Ok(sample) => {
                stats.units_decoded += 1;
                out.push(sample);
            }
            Err(e) => {
                stats.units_skipped += 1;
                debug!("Skipping KLV unit on PID 0x{:04X}: {}", unit.pid, e);
            }
        }
    }
}

/// Lazily yields the telemetry contained in a complete TS buffer, such as
/// the contents of a finished chunk file.
pub struct TelemetryIter<'a> {
    packets: TsPacketIterator<'a>,
    extractor: KlvExtractor,
    ready: VecDeque<TelemetrySample>,
    scratch: Vec<TelemetrySample>,
    finished: bool,
}

impl<'a> TelemetryIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            packets: TsPacketIterator::new(data),
            extractor: KlvExtractor::new(),
            ready: VecDeque::new(),
            scratch: Vec::new(),
            finished: false,
        }
    }

    pub fn stats(&self) -> ExtractorStats {
        self.extractor.stats()
    }
}

impl<'a> Iterator for TelemetryIter<'a> {
    type Item = TelemetrySample;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(sample) = self.ready.pop_front() {
                return Some(sample);
            }
            if self.finished {
                return None;
            }

            match self.packets.next() {
                Some(packet) => self.extractor.push_parsed(&packet, &mut self.scratch),
                None => {
                    self.extractor.finish(&mut self.scratch);
                    self.finished = true;
                }
            }
            self.ready.extend(self.scratch.drain(..));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::encode;
    use crate::klv::tests::build_unit;
    use crate::packet::TS_PACKET_SIZE;
    use crate::telemetry::tag;

    pub(crate) const KLV_PID: u16 = 0x1F1;

    pub(crate) fn klv_packets(klv: &[u8], first_cc: u8) -> Vec<u8> {
        encode::klv_pes_packets(KLV_PID, klv, first_cc)
    }

    pub(crate) fn sample_unit(micros: u64, lat: f64, lon: f64) -> Vec<u8> {
        build_unit(&[
            (tag::PRECISION_TIMESTAMP, encode::timestamp(micros)),
            (tag::IMAGE_SOURCE_SENSOR, b"IR".to_vec()),
            (tag::SENSOR_TRUE_ALTITUDE, encode::altitude(1000.0)),
            (tag::FRAME_CENTER_LATITUDE, encode::latitude(lat)),
            (tag::FRAME_CENTER_LONGITUDE, encode::longitude(lon)),
        ])
    }

    #[test]
    fn test_extracts_each_unit_once() {
        let mut stream = Vec::new();
        for i in 0..5u64 {
            stream.extend(klv_packets(&sample_unit(i * 1_000_000, 10.0, 20.0), i as u8));
        }

        let samples: Vec<_> = TelemetryIter::new(&stream).collect();
        assert_eq!(samples.len(), 5);
        let times: Vec<i64> = samples
            .iter()
            .map(|s| s.timestamp.unwrap().timestamp())
            .collect();
        assert_eq!(times, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_malformed_unit_is_skipped() {
        let good = sample_unit(5_000_000, 1.0, 2.0);
        let mut bad = sample_unit(6_000_000, 1.0, 2.0);
        let n = bad.len();
        bad[n - 1] ^= 0x55;

        let mut payload = bad.clone();
        payload.extend_from_slice(&good);
        let stream = klv_packets(&payload, 0);

        let mut iter = TelemetryIter::new(&stream);
        let samples: Vec<_> = iter.by_ref().collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp.unwrap().timestamp(), 5);
        assert_eq!(iter.stats().units_skipped, 1);
        assert_eq!(iter.stats().units_decoded, 1);
    }

    #[test]
    fn test_incremental_matches_batch() {
        let mut stream = Vec::new();
        for i in 0..3u64 {
            stream.extend(klv_packets(&sample_unit(i, 0.0, 0.0), (i * 2) as u8));
        }

        let mut extractor = KlvExtractor::new();
        let mut out = Vec::new();
        for packet in stream.chunks(TS_PACKET_SIZE) {
            extractor.push_packet(packet, &mut out);
        }
        extractor.finish(&mut out);

        let batch: Vec<_> = TelemetryIter::new(&stream).collect();
        assert_eq!(out, batch);
    }
}
