//! UAS Datalink Local Set telemetry mapping.
//!
//! Raw local set items are converted into engineering units. Fields that
//! carry the reserved "error" value, or whose length is wrong, are left
//! unset instead of failing the whole unit.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::klv::{KlvUnit, LocalSetItem};

/// Local set tags understood by the decoder.
pub mod tag {
    pub const CHECKSUM: u32 = 1;
    pub const PRECISION_TIMESTAMP: u32 = 2;
    pub const MISSION_ID: u32 = 3;
    pub const PLATFORM_HEADING: u32 = 5;
    pub const PLATFORM_PITCH: u32 = 6;
    pub const PLATFORM_ROLL: u32 = 7;
    pub const PLATFORM_DESIGNATION: u32 = 10;
    pub const IMAGE_SOURCE_SENSOR: u32 = 11;
    pub const SENSOR_LATITUDE: u32 = 13;
    pub const SENSOR_LONGITUDE: u32 = 14;
    pub const SENSOR_TRUE_ALTITUDE: u32 = 15;
    pub const SENSOR_HFOV: u32 = 16;
    pub const SENSOR_VFOV: u32 = 17;
    pub const FRAME_CENTER_LATITUDE: u32 = 23;
    pub const FRAME_CENTER_LONGITUDE: u32 = 24;
    pub const FRAME_CENTER_ELEVATION: u32 = 25;
    /// First of the eight offset corner tags (lat/lon pairs, 26..=33).
    pub const OFFSET_CORNER_LATITUDE_1: u32 = 26;
    pub const OFFSET_CORNER_LONGITUDE_4: u32 = 33;
    /// First of the eight full corner tags (lat/lon pairs, 82..=89).
    pub const CORNER_LATITUDE_1: u32 = 82;
    pub const CORNER_LONGITUDE_4: u32 = 89;
}

/// A geodetic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// Telemetry decoded from one UAS local set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: Option<DateTime<Utc>>,
    pub mission_id: Option<String>,
    pub platform_designation: Option<String>,
    /// Image source sensor, e.g. "EO" or "IR".
    pub sensor_id: Option<String>,
    pub platform_heading: Option<f64>,
    pub platform_pitch: Option<f64>,
    pub platform_roll: Option<f64>,
    pub sensor_position: Option<LatLon>,
    /// Sensor true altitude in meters above MSL.
    pub sensor_altitude: Option<f64>,
    pub horizontal_fov: Option<f64>,
    pub vertical_fov: Option<f64>,
    pub frame_center: Option<LatLon>,
    pub frame_center_elevation: Option<f64>,
    /// Offsets of the four image corners from the frame center, in degrees.
    pub offset_corners: Option<[LatLon; 4]>,
    pub corners: Option<[LatLon; 4]>,
}

impl TelemetrySample {
    /// Decode a KLV unit, verifying its checksum first.
    pub fn decode(unit: &KlvUnit<'_>) -> Result<Self> {
        let items = unit.local_set()?;
        Ok(Self::from_items(&items))
    }

    /// Map local set items to a sample. Unknown tags are ignored.
    pub fn from_items(items: &[LocalSetItem<'_>]) -> Self {
        let mut sample = TelemetrySample::default();
        let mut sensor = (None, None);
        let mut center = (None, None);
        let mut offsets = [None; 8];
        let mut full = [None; 8];

        for item in items {
            let v = item.value;
            match item.tag {
                tag::PRECISION_TIMESTAMP => sample.timestamp = timestamp(v),
                tag::MISSION_ID => sample.mission_id = text(v),
                tag::PLATFORM_HEADING => sample.platform_heading = unsigned(v, 360.0, 0.0),
                tag::PLATFORM_PITCH => sample.platform_pitch = signed16(v, 40.0),
                tag::PLATFORM_ROLL => sample.platform_roll = signed16(v, 100.0),
                tag::PLATFORM_DESIGNATION => sample.platform_designation = text(v),
                tag::IMAGE_SOURCE_SENSOR => sample.sensor_id = text(v),
                tag::SENSOR_LATITUDE => sensor.0 = latitude(v),
                tag::SENSOR_LONGITUDE => sensor.1 = longitude(v),
                tag::SENSOR_TRUE_ALTITUDE => sample.sensor_altitude = altitude(v),
                tag::SENSOR_HFOV => sample.horizontal_fov = unsigned(v, 180.0, 0.0),
                tag::SENSOR_VFOV => sample.vertical_fov = unsigned(v, 180.0, 0.0),
                tag::FRAME_CENTER_LATITUDE => center.0 = latitude(v),
                tag::FRAME_CENTER_LONGITUDE => center.1 = longitude(v),
                tag::FRAME_CENTER_ELEVATION => sample.frame_center_elevation = altitude(v),
                t @ tag::OFFSET_CORNER_LATITUDE_1..=tag::OFFSET_CORNER_LONGITUDE_4 => {
                    offsets[(t - tag::OFFSET_CORNER_LATITUDE_1) as usize] = corner_offset(v)
                }
                t @ tag::CORNER_LATITUDE_1..=tag::CORNER_LONGITUDE_4 => {
                    let i = (t - tag::CORNER_LATITUDE_1) as usize;
                    full[i] = if i % 2 == 0 { latitude(v) } else { longitude(v) };
                }
                _ => {}
            }
        }

        sample.sensor_position = pair(sensor);
        sample.frame_center = pair(center);
        sample.offset_corners = corners(&offsets);
        sample.corners = corners(&full);
        sample
    }

    /// Whether the sample carries any position at all.
    pub fn has_position(&self) -> bool {
        self.frame_center.is_some() || self.corners.is_some() || self.sensor_position.is_some()
    }
}

fn pair((lat, lon): (Option<f64>, Option<f64>)) -> Option<LatLon> {
    Some(LatLon {
        lat: lat?,
        lon: lon?,
    })
}

fn corners(values: &[Option<f64>; 8]) -> Option<[LatLon; 4]> {
    let mut out = [LatLon { lat: 0.0, lon: 0.0 }; 4];
    for (i, corner) in out.iter_mut().enumerate() {
        corner.lat = values[2 * i]?;
        corner.lon = values[2 * i + 1]?;
    }
    Some(out)
}

fn timestamp(v: &[u8]) -> Option<DateTime<Utc>> {
    let micros = u64::from_be_bytes(v.try_into().ok()?);
    Utc.timestamp_micros(i64::try_from(micros).ok()?).single()
}

fn text(v: &[u8]) -> Option<String> {
    let s = String::from_utf8_lossy(v).trim_end_matches('\0').trim().to_string();
    (!s.is_empty()).then_some(s)
}

/// Unsigned 16-bit value mapped onto `[offset, offset + range]`.
fn unsigned(v: &[u8], range: f64, offset: f64) -> Option<f64> {
    let raw = u16::from_be_bytes(v.try_into().ok()?);
    Some(raw as f64 * range / 65535.0 + offset)
}

/// Signed 16-bit value mapped onto `[-range/2, range/2]`; 0x8000 marks an error.
fn signed16(v: &[u8], range: f64) -> Option<f64> {
    let raw = i16::from_be_bytes(v.try_into().ok()?);
    (raw != i16::MIN).then(|| raw as f64 * range / 65534.0)
}

fn signed32(v: &[u8], range: f64) -> Option<f64> {
    let raw = i32::from_be_bytes(v.try_into().ok()?);
    (raw != i32::MIN).then(|| raw as f64 * range / 4_294_967_294.0)
}

fn latitude(v: &[u8]) -> Option<f64> {
    signed32(v, 180.0)
}

fn longitude(v: &[u8]) -> Option<f64> {
    signed32(v, 360.0)
}

fn altitude(v: &[u8]) -> Option<f64> {
    unsigned(v, 19_900.0, -900.0)
}

fn corner_offset(v: &[u8]) -> Option<f64> {
    signed16(v, 0.15)
}
