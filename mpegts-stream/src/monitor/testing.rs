//! Synthetic TS traffic for monitor tests.

use stream_klv::encode;
use stream_klv::telemetry::tag;
use stream_klv::TS_PACKET_SIZE;

pub const KLV_PID: u16 = 0x1F1;
pub const PACKETS_PER_DATAGRAM: usize = 7;
pub const DATAGRAM_SIZE: usize = PACKETS_PER_DATAGRAM * TS_PACKET_SIZE;

/// Base of the telemetry timestamps, 2023-11-14T22:13:20Z.
pub const BASE_MICROS: u64 = 1_700_000_000_000_000;

pub fn klv_unit(micros: u64, lat: f64, lon: f64) -> Vec<u8> {
    encode::build_local_set(&[
        (tag::PRECISION_TIMESTAMP, encode::timestamp(micros)),
        (tag::IMAGE_SOURCE_SENSOR, b"EO".to_vec()),
        (tag::SENSOR_TRUE_ALTITUDE, encode::altitude(1200.0)),
        (tag::FRAME_CENTER_LATITUDE, encode::latitude(lat)),
        (tag::FRAME_CENTER_LONGITUDE, encode::longitude(lon)),
    ])
}

/// Generates datagrams of seven packets, every `klv_every`th one starting
/// with a KLV packet.
pub struct TrafficGenerator {
    klv_every: usize,
    emitted: usize,
    klv_cc: u8,
}

impl TrafficGenerator {
    pub fn new(klv_every: usize) -> Self {
        Self {
            klv_every: klv_every.max(1),
            emitted: 0,
            klv_cc: 0,
        }
    }

    pub fn next_datagram(&mut self) -> Vec<u8> {
        let index = self.emitted;
        self.emitted += 1;

        let mut datagram = Vec::with_capacity(DATAGRAM_SIZE);
        if index % self.klv_every == 0 {
            let unit = klv_unit(
                BASE_MICROS + index as u64 * 10_000,
                35.0 + index as f64 * 1e-5,
                -117.0,
            );
            let packets = encode::klv_pes_packets(KLV_PID, &unit, self.klv_cc);
            self.klv_cc = self
                .klv_cc
                .wrapping_add((packets.len() / TS_PACKET_SIZE) as u8);
            datagram.extend_from_slice(&packets);
        }
        while datagram.len() < DATAGRAM_SIZE {
            datagram.extend_from_slice(&encode::null_packet());
        }
        datagram.truncate(DATAGRAM_SIZE);
        datagram
    }
}
