//! Chunk rollover: conditions, filenames and the catalog commit.

mod action;
mod condition;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use stream_klv::TelemetrySample;
use thiserror::Error;

use crate::catalog::{CatalogError, Record};

pub use action::{CatalogRolloverAction, RolloverSettings};
pub use condition::{ChunkProgress, RolloverCondition};

/// Attempts made for parent creation and record updates.
pub const MAX_CATALOG_ATTEMPTS: usize = 5;

/// A closed chunk file ready to be committed.
#[derive(Debug, Clone)]
pub struct CompletedChunk {
    pub path: PathBuf,
    /// 1-based position of the chunk within the session.
    pub sequence: u64,
    pub byte_length: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub samples: Vec<TelemetrySample>,
}

/// Rollover action failures. All of them lose at most the one chunk.
#[derive(Error, Debug)]
pub enum RolloverActionError {
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: usize,
        source: CatalogError,
    },

    #[error("{operation} rejected: {source}")]
    Rejected {
        operation: &'static str,
        source: CatalogError,
    },

    #[error("Content create failed for chunk #{sequence}: {source}")]
    ContentCreateFailed { sequence: u64, source: CatalogError },

    #[error("Parent record missing")]
    ParentMissing,
}

/// The session's parent record, shared by every commit of one stream.
///
/// The lock is held across catalog calls so that only one commit at a time
/// can create or rewrite the parent.
#[derive(Debug, Default)]
pub struct ParentState {
    record: Mutex<Option<Record>>,
}

impl ParentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<String> {
        self.record.lock().as_ref().map(|r| r.id.clone())
    }

    pub fn snapshot(&self) -> Option<Record> {
        self.record.lock().clone()
    }
}

/// File name of a chunk: `<title>-<sequence>-<start time>.ts`.
pub fn chunk_filename(title: &str, sequence: u64, started_at: DateTime<Utc>) -> String {
    let safe: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{}-{:05}-{}.ts",
        safe,
        sequence,
        started_at.format("%Y%m%dT%H%M%S%3fZ")
    )
}
