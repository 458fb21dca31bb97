//! Catalog records and the framework the rollover action writes to.
//!
//! A stream produces one parent record per session and one child record per
//! committed chunk. Children point at their parent through the derived
//! association; the parent lists its children through the related one.

pub mod sqlite;

#[cfg(test)]
pub mod memory;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use geo::Geometry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sqlite::SqliteCatalog;

/// Attribute names used on parent and child records.
pub mod attribute {
    pub const TITLE: &str = "title";
    pub const RESOURCE_URI: &str = "resource-uri";
    pub const RESOURCE_SIZE: &str = "resource-size";
    pub const CREATED: &str = "created";
    pub const MODIFIED: &str = "modified";
    pub const TEMPORAL_START: &str = "temporal.start";
    pub const TEMPORAL_END: &str = "temporal.end";
    pub const LOCATION: &str = "location";
    pub const CRS_NAME: &str = "location.crs-name";
    pub const ALTITUDE: &str = "location.altitude-meters";
    pub const FRAME_CENTER: &str = "media.frame-center";
    pub const MEDIA_FORMAT: &str = "media.format";
    pub const SENSOR_ID: &str = "isr.sensor-id";
    pub const PLATFORM: &str = "isr.platform-id";
    pub const MISSION: &str = "isr.mission-id";
    /// On a child: the id of its parent.
    pub const ASSOCIATIONS_DERIVED: &str = "metacard.associations.derived";
    /// On a parent: the ids of its children.
    pub const ASSOCIATIONS_RELATED: &str = "metacard.associations.related";
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Double(f64),
    Date(DateTime<Utc>),
    Geometry(Geometry<f64>),
    List(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Parent,
    Child,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Parent => "parent",
            RecordKind::Child => "child",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parent" => Some(RecordKind::Parent),
            "child" => Some(RecordKind::Child),
            _ => None,
        }
    }
}

/// A catalog record: an id plus a bag of named attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Empty until the catalog assigns one.
    pub id: String,
    pub kind: RecordKind,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Record {
    pub fn new(kind: RecordKind) -> Self {
        Self {
            id: String::new(),
            kind,
            attributes: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn set(&mut self, name: &str, value: AttributeValue) {
        self.attributes.insert(name.to_string(), value);
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(AttributeValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn date(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.get(name) {
            Some(AttributeValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn geometry(&self, name: &str) -> Option<&Geometry<f64>> {
        match self.get(name) {
            Some(AttributeValue::Geometry(g)) => Some(g),
            _ => None,
        }
    }

    pub fn list(&self, name: &str) -> Option<&[String]> {
        match self.get(name) {
            Some(AttributeValue::List(l)) => Some(l),
            _ => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.text(attribute::TITLE)
    }

    /// Attributes of `self` that are new or differ from `before`.
    pub fn changed_since(&self, before: &Record) -> BTreeMap<String, AttributeValue> {
        self.attributes
            .iter()
            .filter(|(name, value)| before.attributes.get(*name) != Some(*value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// Catalog failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    /// The catalog could not be reached or is busy. Worth retrying.
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    /// The catalog refused the request. Retrying will not help.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl CatalogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Unavailable(_))
    }
}

/// Create a metadata-only record.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub record: Record,
}

/// Create a record backed by stored content.
#[derive(Debug, Clone)]
pub struct ContentCreateRequest {
    pub record: Record,
    /// File to ingest. The catalog copies it; the caller still owns it.
    pub content_path: PathBuf,
    pub filename: String,
    pub mime_type: String,
}

/// Replace the named attributes of an existing record.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub id: String,
    pub attributes: BTreeMap<String, AttributeValue>,
}

/// Storage for parent and child records.
///
/// Calls block; async callers run them on the blocking pool.
pub trait CatalogFramework: Send + Sync {
    fn create(&self, request: CreateRequest) -> Result<Record, CatalogError>;

    fn create_content(&self, request: ContentCreateRequest) -> Result<Record, CatalogError>;

    /// Returns the record with the update applied.
    fn update(&self, request: UpdateRequest) -> Result<Record, CatalogError>;

    fn get(&self, id: &str) -> Result<Option<Record>, CatalogError>;
}

pub type CatalogHandle = Arc<dyn CatalogFramework>;

/// MIME type of stored chunks.
pub const MPEG_TS_MIME_TYPE: &str = "video/mp2t";
