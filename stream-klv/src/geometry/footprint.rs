//! Sensor footprints derived from telemetry.
//!
//! Geometries use x = longitude, y = latitude.

use geo::{Geometry, LineString, MultiPoint, MultiPolygon, Point, Polygon};

use super::{is_valid, Context, GeometryOperatorList};
use crate::telemetry::{LatLon, TelemetrySample};

/// Ground footprint of a single sample.
///
/// Full corner coordinates are preferred. Otherwise the corners are
/// rebuilt from the frame center and the four corner offsets.
pub fn footprint(sample: &TelemetrySample) -> Option<Polygon<f64>> {
    let corners = match (sample.corners, sample.frame_center, sample.offset_corners) {
        (Some(corners), _, _) => corners,
        (None, Some(center), Some(offsets)) => offsets.map(|o| LatLon {
            lat: center.lat + o.lat,
            lon: center.lon + o.lon,
        }),
        _ => return None,
    };

    let mut ring: Vec<(f64, f64)> = corners.iter().map(|c| (c.lon, c.lat)).collect();
    ring.push((corners[0].lon, corners[0].lat));
    let polygon = Polygon::new(LineString::from(ring), vec![]);

    is_valid(&Geometry::Polygon(polygon.clone())).then_some(polygon)
}

pub fn frame_center(sample: &TelemetrySample) -> Option<Point<f64>> {
    sample.frame_center.map(|c| Point::new(c.lon, c.lat))
}

/// Geometry summary of a run of samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkGeometry {
    /// Combined footprint after the operator pipeline.
    pub location: Option<Geometry<f64>>,
    /// Most recent frame center.
    pub frame_center: Option<Point<f64>>,
    /// Mean sensor altitude in meters.
    pub mean_altitude: Option<f64>,
}

/// Summarize the samples of one chunk.
///
/// The location is the union of per-sample footprints when any exist,
/// falling back to the frame centers and then the sensor positions.
pub fn summarize(
    samples: &[TelemetrySample],
    pipeline: &GeometryOperatorList,
    context: &Context,
) -> ChunkGeometry {
    let footprints: Vec<Polygon<f64>> = samples.iter().filter_map(footprint).collect();

    let raw = if !footprints.is_empty() {
        Some(Geometry::MultiPolygon(MultiPolygon::new(footprints)))
    } else {
        let centers: Vec<Point<f64>> = samples.iter().filter_map(frame_center).collect();
        let points = if centers.is_empty() {
            samples
                .iter()
                .filter_map(|s| s.sensor_position)
                .map(|p| Point::new(p.lon, p.lat))
                .collect()
        } else {
            centers
        };
        points_geometry(points)
    };

    let location = raw
        .filter(is_valid)
        .map(|geometry| pipeline.apply(&geometry, context));

    let altitudes: Vec<f64> = samples.iter().filter_map(|s| s.sensor_altitude).collect();
    let mean_altitude =
        (!altitudes.is_empty()).then(|| altitudes.iter().sum::<f64>() / altitudes.len() as f64);

    ChunkGeometry {
        location,
        frame_center: samples.iter().rev().find_map(frame_center),
        mean_altitude,
    }
}

fn points_geometry(mut points: Vec<Point<f64>>) -> Option<Geometry<f64>> {
    points.dedup();
    match points.len() {
        0 => None,
        1 => Some(Geometry::Point(points[0])),
        _ => Some(Geometry::MultiPoint(MultiPoint::new(points))),
    }
}
