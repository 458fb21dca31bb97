//! Parent record updaters.
//!
//! After each child commit the parent is folded forward by a fixed chain of
//! updaters. Each one reads the child and mutates only its own parent
//! attributes, so applying a chain twice with the same child is harmless.

use geo::{Geometry, GeometryCollection, LineString, MultiPoint, MultiPolygon, Point};
use stream_klv::geometry::components;
use stream_klv::{Context, GeometryOperatorList};

use crate::catalog::{attribute, AttributeValue, Record};

/// One parent update rule.
#[derive(Debug, Clone, PartialEq)]
pub enum MetacardUpdater {
    /// Keeps the earliest child start time.
    TemporalStart,
    /// Keeps the latest child end time.
    TemporalEnd,
    /// Copies the child end time into the parent's modified date.
    ModifiedDate,
    /// Appends the child id to the parent's related list.
    Association,
    /// Extends the parent's frame center track with the child's.
    FrameCenter,
    /// Unions the child location into the parent's.
    Location {
        operators: GeometryOperatorList,
        context: Context,
    },
}

impl MetacardUpdater {
    pub fn location(context: Context) -> Self {
        MetacardUpdater::Location {
            operators: GeometryOperatorList::new(vec![
                stream_klv::GeometryOperator::SubpolygonsToEnvelopes,
                stream_klv::GeometryOperator::Simplify,
            ]),
            context,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MetacardUpdater::TemporalStart => "temporal-start",
            MetacardUpdater::TemporalEnd => "temporal-end",
            MetacardUpdater::ModifiedDate => "modified-date",
            MetacardUpdater::Association => "association",
            MetacardUpdater::FrameCenter => "frame-center",
            MetacardUpdater::Location { .. } => "location",
        }
    }

    pub fn update(&self, parent: &mut Record, child: &Record) {
        match self {
            MetacardUpdater::TemporalStart => {
                if let Some(start) = child.date(attribute::TEMPORAL_START) {
                    if parent.date(attribute::TEMPORAL_START).map_or(true, |p| start < p) {
                        parent.set(attribute::TEMPORAL_START, AttributeValue::Date(start));
                    }
                }
            }
            MetacardUpdater::TemporalEnd => {
                if let Some(end) = child.date(attribute::TEMPORAL_END) {
                    if parent.date(attribute::TEMPORAL_END).map_or(true, |p| end > p) {
                        parent.set(attribute::TEMPORAL_END, AttributeValue::Date(end));
                    }
                }
            }
            MetacardUpdater::ModifiedDate => {
                if let Some(end) = child.date(attribute::TEMPORAL_END) {
                    parent.set(attribute::MODIFIED, AttributeValue::Date(end));
                }
            }
            MetacardUpdater::Association => {
                let mut related = parent
                    .list(attribute::ASSOCIATIONS_RELATED)
                    .map(<[String]>::to_vec)
                    .unwrap_or_default();
                if !related.contains(&child.id) {
                    related.push(child.id.clone());
                    parent.set(attribute::ASSOCIATIONS_RELATED, AttributeValue::List(related));
                }
            }
            MetacardUpdater::FrameCenter => {
                if let Some(Geometry::Point(center)) = child.geometry(attribute::FRAME_CENTER) {
                    let track = extend_track(parent.geometry(attribute::FRAME_CENTER), *center);
                    parent.set(attribute::FRAME_CENTER, AttributeValue::Geometry(track));
                }
            }
            MetacardUpdater::Location { operators, context } => {
                if let Some(child_location) = child.geometry(attribute::LOCATION) {
                    let merged = match parent.geometry(attribute::LOCATION) {
                        Some(existing) => {
                            operators.apply(&combine(existing, child_location), context)
                        }
                        None => child_location.clone(),
                    };
                    parent.set(attribute::LOCATION, AttributeValue::Geometry(merged));
                }
            }
        }
    }
}

fn extend_track(existing: Option<&Geometry<f64>>, center: Point<f64>) -> Geometry<f64> {
    match existing {
        Some(Geometry::Point(last)) if *last != center => {
            Geometry::LineString(LineString::from(vec![last.0, center.0]))
        }
        Some(Geometry::LineString(track)) => {
            let mut track = track.clone();
            if track.0.last() != Some(&center.0) {
                track.0.push(center.0);
            }
            Geometry::LineString(track)
        }
        _ => Geometry::Point(center),
    }
}

/// Gather the parts of two geometries into one multi-part geometry.
fn combine(a: &Geometry<f64>, b: &Geometry<f64>) -> Geometry<f64> {
    let parts: Vec<Geometry<f64>> = components(a).into_iter().chain(components(b)).collect();

    if parts.iter().all(|g| matches!(g, Geometry::Polygon(_))) {
        let polygons = parts
            .into_iter()
            .filter_map(|g| match g {
                Geometry::Polygon(p) => Some(p),
                _ => None,
            })
            .collect();
        return Geometry::MultiPolygon(MultiPolygon::new(polygons));
    }

    if parts.iter().all(|g| matches!(g, Geometry::Point(_))) {
        let mut points: Vec<Point<f64>> = parts
            .into_iter()
            .filter_map(|g| match g {
                Geometry::Point(p) => Some(p),
                _ => None,
            })
            .collect();
        points.dedup();
        return if points.len() == 1 {
            Geometry::Point(points[0])
        } else {
            Geometry::MultiPoint(MultiPoint::new(points))
        };
    }

    Geometry::GeometryCollection(GeometryCollection::from(parts))
}

/// Ordered updater chain applied to the parent after each child commit.
#[derive(Debug, Clone, PartialEq)]
pub struct MetacardUpdaterChain {
    updaters: Vec<MetacardUpdater>,
}

impl MetacardUpdaterChain {
    pub fn new(updaters: Vec<MetacardUpdater>) -> Self {
        Self { updaters }
    }

    /// Every updater, in the order they are applied.
    pub fn standard(context: Context) -> Self {
        Self::new(vec![
            MetacardUpdater::TemporalStart,
            MetacardUpdater::TemporalEnd,
            MetacardUpdater::ModifiedDate,
            MetacardUpdater::Association,
            MetacardUpdater::FrameCenter,
            MetacardUpdater::location(context),
        ])
    }

    pub fn update(&self, parent: &mut Record, child: &Record) {
        for updater in &self.updaters {
            updater.update(parent, child);
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.updaters.iter().map(MetacardUpdater::name).collect()
    }
}
