//! Geometry operators applied to chunk and parent footprints.
//!
//! Operators are stateless and may be shared across threads. Every operator
//! either produces a structurally valid geometry or hands back its input
//! unchanged, so a pipeline never makes a footprint worse than it was.

mod footprint;
mod operators;

use geo::{Area, CoordsIter, Geometry, LineString, Polygon};

pub use footprint::{footprint, frame_center, summarize, ChunkGeometry};
pub use operators::{components, num_geometries};

/// Tolerances shared by all operators in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Context {
    /// Simplification tolerance in degrees.
    pub distance_tolerance: f64,
    /// Buffer distance in degrees. Zero disables buffering.
    pub buffer_distance: f64,
    /// Segments used to approximate a buffered point.
    pub buffer_segments: usize,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            distance_tolerance: 0.0001,
            buffer_distance: 0.0,
            buffer_segments: 16,
        }
    }
}

impl Context {
    pub fn with_tolerance(distance_tolerance: f64) -> Self {
        Self {
            distance_tolerance,
            ..Self::default()
        }
    }
}

/// A single geometry transform.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryOperator {
    /// Returns the input unchanged.
    Identity,
    /// Clamps latitude into [-90, 90] and wraps longitude into [-180, 180].
    Normalize,
    /// Douglas-Peucker simplification at the context tolerance.
    Simplify,
    ConvexHull,
    /// Bounding rectangle of the whole geometry.
    Envelope,
    /// Replaces each part of a multi-part geometry with its bounding
    /// rectangle and unions the results.
    SubpolygonsToEnvelopes,
    /// Convex approximation of a buffer at the context distance.
    Buffer,
    List(GeometryOperatorList),
}

impl GeometryOperator {
    pub fn name(&self) -> &'static str {
        match self {
            GeometryOperator::Identity => "identity",
            GeometryOperator::Normalize => "normalize",
            GeometryOperator::Simplify => "simplify",
            GeometryOperator::ConvexHull => "convex-hull",
            GeometryOperator::Envelope => "envelope",
            GeometryOperator::SubpolygonsToEnvelopes => "subpolygons-to-envelopes",
            GeometryOperator::Buffer => "buffer",
            GeometryOperator::List(_) => "list",
        }
    }

    /// Apply the operator, falling back to `geometry` if the result is invalid.
    pub fn apply(&self, geometry: &Geometry<f64>, context: &Context) -> Geometry<f64> {
        let output = match self {
            GeometryOperator::Identity => return geometry.clone(),
            GeometryOperator::List(list) => return list.apply(geometry, context),
            GeometryOperator::Normalize => operators::normalize(geometry),
            GeometryOperator::Simplify => {
                operators::simplify(geometry, context.distance_tolerance)
            }
            GeometryOperator::ConvexHull => operators::convex_hull(geometry),
            GeometryOperator::Envelope => operators::envelope(geometry),
            GeometryOperator::SubpolygonsToEnvelopes => {
                operators::subpolygons_to_envelopes(geometry)
            }
            GeometryOperator::Buffer => operators::buffer(
                geometry,
                context.buffer_distance,
                context.buffer_segments,
            ),
        };

        if is_valid(&output) {
            output
        } else {
            geometry.clone()
        }
    }
}

/// An ordered chain of operators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryOperatorList {
    operators: Vec<GeometryOperator>,
}

impl GeometryOperatorList {
    pub fn new(operators: Vec<GeometryOperator>) -> Self {
        Self { operators }
    }

    /// Chain used for chunk and parent locations.
    pub fn location() -> Self {
        Self::new(vec![
            GeometryOperator::Normalize,
            GeometryOperator::SubpolygonsToEnvelopes,
            GeometryOperator::Simplify,
        ])
    }

    pub fn operators(&self) -> &[GeometryOperator] {
        &self.operators
    }

    pub fn apply(&self, geometry: &Geometry<f64>, context: &Context) -> Geometry<f64> {
        self.operators
            .iter()
            .fold(geometry.clone(), |acc, op| op.apply(&acc, context))
    }
}

/// Structural validity check.
///
/// Coordinates must be finite, multi-part geometries non-empty, line
/// strings at least two points long and polygon rings closed with a
/// non-zero enclosed area.
pub fn is_valid(geometry: &Geometry<f64>) -> bool {
    if !geometry
        .coords_iter()
        .all(|c| c.x.is_finite() && c.y.is_finite())
    {
        return false;
    }

    match geometry {
        Geometry::Point(_) => true,
        Geometry::Line(line) => line.start != line.end,
        Geometry::LineString(ls) => ls.0.len() >= 2,
        Geometry::Polygon(p) => polygon_is_valid(p),
        Geometry::MultiPoint(mp) => !mp.0.is_empty(),
        Geometry::MultiLineString(mls) => {
            !mls.0.is_empty() && mls.0.iter().all(|ls| ls.0.len() >= 2)
        }
        Geometry::MultiPolygon(mp) => !mp.0.is_empty() && mp.0.iter().all(polygon_is_valid),
        Geometry::GeometryCollection(gc) => !gc.0.is_empty() && gc.0.iter().all(is_valid),
        Geometry::Rect(r) => r.width() > 0.0 && r.height() > 0.0,
        Geometry::Triangle(t) => t.to_polygon().unsigned_area() > 0.0,
    }
}

fn ring_is_valid(ring: &LineString<f64>) -> bool {
    ring.0.len() >= 4 && ring.is_closed()
}

fn polygon_is_valid(polygon: &Polygon<f64>) -> bool {
    ring_is_valid(polygon.exterior())
        && polygon.interiors().iter().all(ring_is_valid)
        && polygon.unsigned_area() > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, GeometryCollection, MultiPoint, MultiPolygon, Point};

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
            (x: x, y: y),
        ]
    }

    #[test]
    fn test_identity_returns_input() {
        let g = Geometry::Polygon(square(0.0, 0.0, 1.0));
        assert_eq!(GeometryOperator::Identity.apply(&g, &Context::default()), g);
    }

    #[test]
    fn test_validity() {
        assert!(is_valid(&Geometry::Point(Point::new(1.0, 2.0))));
        assert!(!is_valid(&Geometry::Point(Point::new(f64::NAN, 2.0))));
        assert!(is_valid(&Geometry::Polygon(square(0.0, 0.0, 1.0))));

        let flat = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0), (x: 0.0, y: 0.0)];
        assert!(!is_valid(&Geometry::Polygon(flat)));
        assert!(!is_valid(&Geometry::MultiPolygon(MultiPolygon::new(vec![]))));
    }

    #[test]
    fn test_subpolygons_to_envelopes_single_geometry_unchanged() {
        let g = Geometry::Polygon(square(0.0, 0.0, 1.0));
        let out = GeometryOperator::SubpolygonsToEnvelopes.apply(&g, &Context::default());
        assert_eq!(out, g);
    }

    #[test]
    fn test_subpolygons_to_envelopes_unions_parts() {
        let tri_a = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 0.0, y: 2.0), (x: 0.0, y: 0.0)];
        let tri_b = polygon![(x: 1.0, y: 1.0), (x: 3.0, y: 1.0), (x: 1.0, y: 3.0), (x: 1.0, y: 1.0)];
        let g = Geometry::MultiPolygon(MultiPolygon::new(vec![tri_a, tri_b]));

        let out = GeometryOperator::SubpolygonsToEnvelopes.apply(&g, &Context::default());
        assert!(is_valid(&out));
        assert_eq!(num_geometries(&out), 1);
        // Two 2x2 squares overlapping in a 1x1 square.
        let area = match &out {
            Geometry::Polygon(p) => p.unsigned_area(),
            Geometry::MultiPolygon(mp) => mp.unsigned_area(),
            other => panic!("unexpected geometry {:?}", other),
        };
        assert!((area - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_subpolygons_to_envelopes_without_polygons_unchanged() {
        let g = Geometry::MultiPoint(MultiPoint::from(vec![(0.0, 0.0), (1.0, 1.0)]));
        let out = GeometryOperator::SubpolygonsToEnvelopes.apply(&g, &Context::default());
        assert_eq!(out, g);
    }

    #[test]
    fn test_subpolygons_to_envelopes_keeps_loose_points() {
        let tri = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 0.0, y: 2.0), (x: 0.0, y: 0.0)];
        let g = Geometry::GeometryCollection(GeometryCollection::from(vec![
            Geometry::Polygon(tri),
            Geometry::Point(Point::new(1.5, 1.5)),
            Geometry::Point(Point::new(9.0, 9.0)),
        ]));

        let out = GeometryOperator::SubpolygonsToEnvelopes.apply(&g, &Context::default());
        let Geometry::GeometryCollection(parts) = &out else {
            panic!("unexpected geometry {:?}", out);
        };
        // The point inside the triangle's envelope is absorbed.
        assert_eq!(parts.0.len(), 2);
        match &parts.0[0] {
            Geometry::Polygon(p) => assert!((p.unsigned_area() - 4.0).abs() < 1e-9),
            other => panic!("unexpected part {:?}", other),
        }
        assert_eq!(parts.0[1], Geometry::Point(Point::new(9.0, 9.0)));

        let twice = GeometryOperator::SubpolygonsToEnvelopes.apply(&out, &Context::default());
        assert_eq!(twice, out);
    }

    #[test]
    fn test_envelope() {
        let tri = polygon![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 0.0, y: 2.0), (x: 0.0, y: 0.0)];
        let out = GeometryOperator::Envelope.apply(&Geometry::Polygon(tri), &Context::default());
        match out {
            Geometry::Polygon(p) => assert!((p.unsigned_area() - 8.0).abs() < 1e-9),
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn test_convex_hull_of_collinear_points_falls_back() {
        let g = Geometry::MultiPoint(MultiPoint::from(vec![(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]));
        assert_eq!(GeometryOperator::ConvexHull.apply(&g, &Context::default()), g);
    }

    #[test]
    fn test_buffer_point() {
        let ctx = Context {
            buffer_distance: 1.0,
            ..Context::default()
        };
        let out = GeometryOperator::Buffer.apply(&Geometry::Point(Point::new(0.0, 0.0)), &ctx);
        match out {
            Geometry::Polygon(p) => {
                let area = p.unsigned_area();
                assert!(area > 3.0 && area < std::f64::consts::PI);
            }
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn test_normalize_wraps_longitude() {
        let g = Geometry::Point(Point::new(190.0, 95.0));
        let out = GeometryOperator::Normalize.apply(&g, &Context::default());
        assert_eq!(out, Geometry::Point(Point::new(-170.0, 90.0)));
    }

    #[test]
    fn test_operators_are_idempotent() {
        let ctx = Context::with_tolerance(0.01);
        let inputs = vec![
            Geometry::MultiPolygon(MultiPolygon::new(vec![
                square(0.0, 0.0, 1.0),
                square(5.0, 5.0, 1.0),
            ])),
            Geometry::Polygon(square(10.0, 10.0, 2.0)),
            Geometry::Point(Point::new(200.0, -100.0)),
        ];
        let ops = [
            GeometryOperator::Identity,
            GeometryOperator::Normalize,
            GeometryOperator::Simplify,
            GeometryOperator::Envelope,
            GeometryOperator::SubpolygonsToEnvelopes,
            GeometryOperator::List(GeometryOperatorList::location()),
        ];

        for op in &ops {
            for g in &inputs {
                let once = op.apply(g, &ctx);
                let twice = op.apply(&once, &ctx);
                assert_eq!(once, twice, "{} is not idempotent on {:?}", op.name(), g);
            }
        }
    }

    #[test]
    fn test_convex_hull_area_is_stable() {
        let g = Geometry::MultiPolygon(MultiPolygon::new(vec![
            square(0.0, 0.0, 1.0),
            square(2.0, 0.0, 1.0),
        ]));
        let once = GeometryOperator::ConvexHull.apply(&g, &Context::default());
        let twice = GeometryOperator::ConvexHull.apply(&once, &Context::default());
        match (once, twice) {
            (Geometry::Polygon(a), Geometry::Polygon(b)) => {
                assert!((a.unsigned_area() - 3.0).abs() < 1e-9);
                assert!((a.unsigned_area() - b.unsigned_area()).abs() < 1e-9);
            }
            other => panic!("unexpected geometries {:?}", other),
        }
    }

    #[test]
    fn test_list_applies_in_order() {
        let list = GeometryOperatorList::new(vec![
            GeometryOperator::Normalize,
            GeometryOperator::Envelope,
        ]);
        let g = Geometry::MultiPoint(MultiPoint::from(vec![(179.0, 0.0), (181.0, 1.0)]));
        let out = list.apply(&g, &Context::default());
        // 181 wraps to -179, so the envelope spans the whole globe
        match out {
            Geometry::Polygon(p) => assert!((p.unsigned_area() - 358.0).abs() < 1e-9),
            other => panic!("unexpected geometry {:?}", other),
        }
    }
}
