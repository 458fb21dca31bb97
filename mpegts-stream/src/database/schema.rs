//! Database schema definitions.

/// SQL schema for the record catalog.
pub const SCHEMA_SQL: &str = r#"
-- Parent and child records
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,                  -- 'parent' or 'child'
    title TEXT,
    resource_uri TEXT,
    attributes TEXT NOT NULL,            -- JSON object of typed attribute values
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    modified_at INTEGER DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind);
CREATE INDEX IF NOT EXISTS idx_records_title ON records(title);

-- Stored chunk content
CREATE TABLE IF NOT EXISTS record_content (
    record_id TEXT PRIMARY KEY,
    path TEXT NOT NULL,                  -- Stored copy of the chunk file
    byte_length INTEGER NOT NULL,
    mime_type TEXT NOT NULL,
    stored_at INTEGER DEFAULT (strftime('%s', 'now')),
    FOREIGN KEY (record_id) REFERENCES records(id) ON DELETE CASCADE
);
"#;
