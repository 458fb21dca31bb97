//! Commits a finished chunk to the catalog.
//!
//! The commit runs in three steps:
//! 1. resolve the session parent, creating it on first use;
//! 2. create the child record with the chunk as its content;
//! 3. fold the child into the parent through the updater chain.
//!
//! Parent creation and updates are retried on transient failures. Content
//! creation is not: a failed ingest loses that chunk and nothing else.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use geo::Geometry;
use log::{debug, error, info, warn};
use stream_klv::{summarize, Context, GeometryOperatorList};

use super::{CompletedChunk, ParentState, RolloverActionError, MAX_CATALOG_ATTEMPTS};
use crate::catalog::{
    attribute, AttributeValue, CatalogError, CatalogHandle, ContentCreateRequest, CreateRequest,
    Record, RecordKind, UpdateRequest, MPEG_TS_MIME_TYPE,
};
use crate::metacard::MetacardUpdaterChain;

/// Coordinate reference system of every location written.
const CRS_NAME: &str = "Geodetic WGS84";

/// Per-stream settings for the rollover action.
#[derive(Debug, Clone)]
pub struct RolloverSettings {
    pub title: String,
    /// Title of the parent record. Defaults to the stream title.
    pub parent_title: Option<String>,
    /// Address the stream is received on, recorded on the parent.
    pub stream_uri: String,
    /// Wait between creating a child and updating the parent.
    pub initial_delay: Duration,
    pub max_attempts: usize,
    pub retry_pause: Duration,
    pub geometry: Context,
}

impl RolloverSettings {
    pub fn new(title: impl Into<String>, stream_uri: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            parent_title: None,
            stream_uri: stream_uri.into(),
            initial_delay: Duration::ZERO,
            max_attempts: MAX_CATALOG_ATTEMPTS,
            retry_pause: Duration::from_millis(500),
            geometry: Context::default(),
        }
    }
}

pub struct CatalogRolloverAction {
    catalog: CatalogHandle,
    parent: Arc<ParentState>,
    updaters: MetacardUpdaterChain,
    pipeline: GeometryOperatorList,
    settings: RolloverSettings,
}

impl CatalogRolloverAction {
    pub fn new(catalog: CatalogHandle, parent: Arc<ParentState>, settings: RolloverSettings) -> Self {
        Self {
            catalog,
            parent,
            updaters: MetacardUpdaterChain::standard(settings.geometry),
            pipeline: GeometryOperatorList::location(),
            settings,
        }
    }

    pub fn with_updaters(mut self, updaters: MetacardUpdaterChain) -> Self {
        self.updaters = updaters;
        self
    }

    pub fn updaters(&self) -> &MetacardUpdaterChain {
        &self.updaters
    }

    /// Commit a chunk and delete its file, whatever the outcome.
    ///
    /// Returns the child record. Blocks; run it on the blocking pool.
    pub fn do_action(&self, chunk: CompletedChunk) -> Result<Record, RolloverActionError> {
        let result = self.commit(&chunk);

        if let Err(e) = fs::remove_file(&chunk.path) {
            warn!(
                "[Stream {}] Failed to remove chunk file {}: {}",
                self.settings.title,
                chunk.path.display(),
                e
            );
        }

        match &result {
            Ok(child) => info!(
                "[Stream {}] Committed chunk #{} ({} bytes, {} samples) as {}",
                self.settings.title,
                chunk.sequence,
                chunk.byte_length,
                chunk.samples.len(),
                child.id
            ),
            Err(e) => error!(
                "[Stream {}] Chunk #{} not fully committed: {}",
                self.settings.title, chunk.sequence, e
            ),
        }
        result
    }

    fn commit(&self, chunk: &CompletedChunk) -> Result<Record, RolloverActionError> {
        let parent_id = self.resolve_parent()?;
        let child = self.create_child(chunk, &parent_id)?;

        if !self.settings.initial_delay.is_zero() {
            thread::sleep(self.settings.initial_delay);
        }
        self.update_parent(&child)?;
        Ok(child)
    }

    fn resolve_parent(&self) -> Result<String, RolloverActionError> {
        let mut guard = self.parent.record.lock();
        if let Some(parent) = guard.as_ref() {
            return Ok(parent.id.clone());
        }

        let mut record = Record::new(RecordKind::Parent);
        let title = self
            .settings
            .parent_title
            .clone()
            .unwrap_or_else(|| self.settings.title.clone());
        record.set(attribute::TITLE, AttributeValue::Text(title));
        record.set(
            attribute::RESOURCE_URI,
            AttributeValue::Text(self.settings.stream_uri.clone()),
        );
        record.set(attribute::CREATED, AttributeValue::Date(Utc::now()));
        record.set(attribute::MEDIA_FORMAT, AttributeValue::Text("MPEG-TS".into()));

        let created = self.with_retry("parent create", || {
            self.catalog.create(CreateRequest {
                record: record.clone(),
            })
        })?;
        info!(
            "[Stream {}] Created parent record {}",
            self.settings.title, created.id
        );

        let id = created.id.clone();
        *guard = Some(created);
        Ok(id)
    }

    fn create_child(
        &self,
        chunk: &CompletedChunk,
        parent_id: &str,
    ) -> Result<Record, RolloverActionError> {
        let record = self.build_child(chunk, parent_id);
        let filename = chunk
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let child = self
            .catalog
            .create_content(ContentCreateRequest {
                record,
                content_path: chunk.path.clone(),
                filename,
                mime_type: MPEG_TS_MIME_TYPE.to_string(),
            })
            .map_err(|source| RolloverActionError::ContentCreateFailed {
                sequence: chunk.sequence,
                source,
            })?;

        let linked = child
            .list(attribute::ASSOCIATIONS_DERIVED)
            .is_some_and(|ids| ids.iter().any(|id| id == parent_id));
        if linked {
            return Ok(child);
        }

        // The catalog dropped the link on ingest; put it back.
        debug!(
            "[Stream {}] Relinking child {} to parent {}",
            self.settings.title, child.id, parent_id
        );
        let mut link = std::collections::BTreeMap::new();
        link.insert(
            attribute::ASSOCIATIONS_DERIVED.to_string(),
            AttributeValue::List(vec![parent_id.to_string()]),
        );
        self.with_retry("child link update", || {
            self.catalog.update(UpdateRequest {
                id: child.id.clone(),
                attributes: link.clone(),
            })
        })
    }

    fn update_parent(&self, child: &Record) -> Result<(), RolloverActionError> {
        let mut guard = self.parent.record.lock();
        let current = guard.as_ref().ok_or(RolloverActionError::ParentMissing)?;

        let mut updated = current.clone();
        self.updaters.update(&mut updated, child);
        let changes = updated.changed_since(current);
        if changes.is_empty() {
            return Ok(());
        }

        let id = current.id.clone();
        let stored = self.with_retry("parent update", || {
            self.catalog.update(UpdateRequest {
                id: id.clone(),
                attributes: changes.clone(),
            })
        })?;
        *guard = Some(stored);
        Ok(())
    }

    fn build_child(&self, chunk: &CompletedChunk, parent_id: &str) -> Record {
        let samples = &chunk.samples;
        let summary = summarize(samples, &self.pipeline, &self.settings.geometry);

        let timestamps = samples.iter().filter_map(|s| s.timestamp);
        let start = timestamps.clone().min().unwrap_or(chunk.started_at);
        let end = timestamps.max().unwrap_or(chunk.ended_at);

        let mut record = Record::new(RecordKind::Child);
        record.set(
            attribute::TITLE,
            AttributeValue::Text(format!("{} chunk {}", self.settings.title, chunk.sequence)),
        );
        record.set(attribute::CREATED, AttributeValue::Date(Utc::now()));
        record.set(attribute::TEMPORAL_START, AttributeValue::Date(start));
        record.set(attribute::TEMPORAL_END, AttributeValue::Date(end));
        record.set(attribute::MEDIA_FORMAT, AttributeValue::Text("MPEG-TS".into()));
        record.set(attribute::CRS_NAME, AttributeValue::Text(CRS_NAME.into()));
        record.set(
            attribute::ASSOCIATIONS_DERIVED,
            AttributeValue::List(vec![parent_id.to_string()]),
        );

        if let Some(location) = summary.location {
            record.set(attribute::LOCATION, AttributeValue::Geometry(location));
        }
        if let Some(center) = summary.frame_center {
            record.set(
                attribute::FRAME_CENTER,
                AttributeValue::Geometry(Geometry::Point(center)),
            );
        }
        if let Some(altitude) = summary.mean_altitude {
            record.set(attribute::ALTITUDE, AttributeValue::Double(altitude));
        }

        let first_text = |f: fn(&stream_klv::TelemetrySample) -> Option<&String>| {
            samples.iter().find_map(f).cloned()
        };
        if let Some(sensor) = first_text(|s| s.sensor_id.as_ref()) {
            record.set(attribute::SENSOR_ID, AttributeValue::Text(sensor));
        }
        if let Some(platform) = first_text(|s| s.platform_designation.as_ref()) {
            record.set(attribute::PLATFORM, AttributeValue::Text(platform));
        }
        if let Some(mission) = first_text(|s| s.mission_id.as_ref()) {
            record.set(attribute::MISSION, AttributeValue::Text(mission));
        }

        record
    }

    fn with_retry<T>(
        &self,
        operation: &'static str,
        mut call: impl FnMut() -> Result<T, CatalogError>,
    ) -> Result<T, RolloverActionError> {
        let attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(source) if !source.is_transient() => {
                    return Err(RolloverActionError::Rejected { operation, source });
                }
                Err(source) if attempt >= attempts => {
                    return Err(RolloverActionError::RetriesExhausted {
                        operation,
                        attempts,
                        source,
                    });
                }
                Err(e) => {
                    warn!(
                        "[Stream {}] {} failed (attempt {}/{}): {}",
                        self.settings.title, operation, attempt, attempts, e
                    );
                    thread::sleep(self.settings.retry_pause);
                    attempt += 1;
                }
            }
        }
    }
}
