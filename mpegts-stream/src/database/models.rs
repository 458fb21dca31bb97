//! Database model definitions.

use serde::Serialize;

/// Stored content row for a child record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredContent {
    pub record_id: String,
    pub path: String,
    pub byte_length: u64,
    pub mime_type: String,
    pub stored_at: i64,
}

/// Lightweight listing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub id: String,
    pub kind: String,
    pub title: Option<String>,
    pub resource_uri: Option<String>,
    // Metadata
    pub created_at: i64,
    pub modified_at: i64,
}
