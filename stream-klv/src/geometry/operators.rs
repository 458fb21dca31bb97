use std::f64::consts::TAU;
use std::panic::{catch_unwind, AssertUnwindSafe};

use geo::{
    coord, BooleanOps, BoundingRect, ConvexHull, CoordsIter, Geometry, GeometryCollection,
    Intersects, LineString, MapCoords, MultiPoint, MultiPolygon, Point, Simplify,
};
use log::warn;

use super::is_valid;

/// Number of top-level parts of a geometry.
pub fn num_geometries(geometry: &Geometry<f64>) -> usize {
    match geometry {
        Geometry::MultiPoint(mp) => mp.0.len(),
        Geometry::MultiLineString(mls) => mls.0.len(),
        Geometry::MultiPolygon(mp) => mp.0.len(),
        Geometry::GeometryCollection(gc) => gc.0.len(),
        _ => 1,
    }
}

/// Top-level parts of a geometry.
pub fn components(geometry: &Geometry<f64>) -> Vec<Geometry<f64>> {
    match geometry {
        Geometry::MultiPoint(mp) => mp.0.iter().copied().map(Geometry::Point).collect(),
        Geometry::MultiLineString(mls) => {
            mls.0.iter().cloned().map(Geometry::LineString).collect()
        }
        Geometry::MultiPolygon(mp) => mp.0.iter().cloned().map(Geometry::Polygon).collect(),
        Geometry::GeometryCollection(gc) => gc.0.clone(),
        other => vec![other.clone()],
    }
}

pub(super) fn normalize(geometry: &Geometry<f64>) -> Geometry<f64> {
    geometry.map_coords(|c| coord! {
        x: wrap_longitude(c.x),
        y: c.y.clamp(-90.0, 90.0),
    })
}

fn wrap_longitude(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}

pub(super) fn simplify(geometry: &Geometry<f64>, tolerance: f64) -> Geometry<f64> {
    if tolerance <= 0.0 {
        return geometry.clone();
    }
    match geometry {
        Geometry::LineString(ls) => Geometry::LineString(ls.simplify(&tolerance)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(mls.simplify(&tolerance)),
        Geometry::Polygon(p) => Geometry::Polygon(p.simplify(&tolerance)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.simplify(&tolerance)),
        other => other.clone(),
    }
}

pub(super) fn convex_hull(geometry: &Geometry<f64>) -> Geometry<f64> {
    let points: MultiPoint<f64> = geometry.coords_iter().map(Point::from).collect();
    if points.0.is_empty() {
        return geometry.clone();
    }
    Geometry::Polygon(points.convex_hull())
}

pub(super) fn envelope(geometry: &Geometry<f64>) -> Geometry<f64> {
    let Some(rect) = geometry.bounding_rect() else {
        return geometry.clone();
    };
    match (rect.width() > 0.0, rect.height() > 0.0) {
        (false, false) => Geometry::Point(Point::from(rect.min())),
        (true, true) => Geometry::Polygon(rect.to_polygon()),
        _ => Geometry::LineString(LineString::new(vec![rect.min(), rect.max()])),
    }
}

pub(super) fn subpolygons_to_envelopes(geometry: &Geometry<f64>) -> Geometry<f64> {
    if num_geometries(geometry) <= 1 {
        return geometry.clone();
    }

    // A point or axis-aligned line is its own envelope. It is kept unless
    // a polygonal envelope covers it.
    let mut envelopes = Vec::new();
    let mut degenerate = Vec::new();
    for part in components(geometry) {
        match part.bounding_rect() {
            Some(rect) if rect.width() > 0.0 && rect.height() > 0.0 => {
                envelopes.push(MultiPolygon::new(vec![rect.to_polygon()]))
            }
            Some(_) => degenerate.push(envelope(&part)),
            None => {}
        }
    }
    if envelopes.is_empty() {
        return geometry.clone();
    }

    // The sweep-line union can panic on numerically hostile input.
    let union = catch_unwind(AssertUnwindSafe(|| {
        let mut parts = envelopes.iter();
        let first = parts.next().cloned().unwrap_or_else(|| MultiPolygon::new(vec![]));
        parts.fold(first, |acc, next| acc.union(next))
    }));

    match union {
        Ok(merged) => {
            let covered = Geometry::MultiPolygon(merged.clone());
            let loose: Vec<_> = degenerate
                .into_iter()
                .filter(|part| !covered.intersects(part))
                .collect();

            let mut parts: Vec<_> = merged.0.into_iter().map(Geometry::Polygon).collect();
            let result = if loose.is_empty() && parts.len() == 1 {
                parts.remove(0)
            } else if loose.is_empty() {
                covered
            } else {
                parts.extend(loose);
                Geometry::GeometryCollection(GeometryCollection::from(parts))
            };
            if is_valid(&result) {
                result
            } else {
                geometry.clone()
            }
        }
        Err(_) => {
            warn!("Envelope union failed, keeping original geometry");
            geometry.clone()
        }
    }
}

pub(super) fn buffer(geometry: &Geometry<f64>, distance: f64, segments: usize) -> Geometry<f64> {
    if distance <= 0.0 || segments < 3 {
        return geometry.clone();
    }

    let step = TAU / segments as f64;
    let points: MultiPoint<f64> = geometry
        .coords_iter()
        .flat_map(|c| {
            (0..segments).map(move |i| {
                let angle = step * i as f64;
                Point::new(c.x + distance * angle.cos(), c.y + distance * angle.sin())
            })
        })
        .collect();
    if points.0.is_empty() {
        return geometry.clone();
    }
    Geometry::Polygon(points.convex_hull())
}
