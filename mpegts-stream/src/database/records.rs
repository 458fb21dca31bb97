//! Record and content database operations.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DatabaseError, RecordSummary, Result, StoredContent};
use crate::catalog::{attribute, AttributeValue, Record, RecordKind};

impl Database {
    /// Insert a new record. The id must already be assigned.
    pub fn insert_record(&self, record: &Record) -> Result<()> {
        insert_record(&self.conn, record)
    }

    /// Get a record by id.
    pub fn get_record(&self, id: &str) -> Result<Option<Record>> {
        let row = self
            .conn
            .query_row(
                "SELECT kind, attributes FROM records WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((kind, attributes)) = row else {
            return Ok(None);
        };
        let kind = RecordKind::parse(&kind).ok_or(DatabaseError::UnknownKind(kind))?;
        let attributes: BTreeMap<String, AttributeValue> = serde_json::from_str(&attributes)?;

        Ok(Some(Record {
            id: id.to_string(),
            kind,
            attributes,
        }))
    }

    /// Merge `changes` into a record's attributes and return the result.
    pub fn update_record_attributes(
        &self,
        id: &str,
        changes: &BTreeMap<String, AttributeValue>,
    ) -> Result<Record> {
        let mut record = self
            .get_record(id)?
            .ok_or_else(|| DatabaseError::RecordNotFound(id.to_string()))?;
        record
            .attributes
            .extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));

        let attributes = serde_json::to_string(&record.attributes)?;
        self.conn.execute(
            "UPDATE records SET title = ?2, resource_uri = ?3, attributes = ?4, modified_at = strftime('%s', 'now') WHERE id = ?1",
            params![
                id,
                record.title(),
                record.text(attribute::RESOURCE_URI),
                attributes,
            ],
        )?;
        Ok(record)
    }

    /// List records, optionally restricted to one kind.
    pub fn list_records(&self, kind: Option<RecordKind>) -> Result<Vec<RecordSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, title, resource_uri, created_at, modified_at
             FROM records WHERE ?1 IS NULL OR kind = ?1 ORDER BY created_at, id",
        )?;

        let rows = stmt.query_map(params![kind.map(|k| k.as_str())], |row| {
            Ok(RecordSummary {
                id: row.get(0)?,
                kind: row.get(1)?,
                title: row.get(2)?,
                resource_uri: row.get(3)?,
                created_at: row.get(4)?,
                modified_at: row.get(5)?,
            })
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }

    /// Insert a child record together with where its content was stored.
    /// Neither row is kept if either insert fails.
    pub fn insert_record_with_content(
        &mut self,
        record: &Record,
        path: &str,
        byte_length: u64,
        mime_type: &str,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        insert_record(&tx, record)?;
        tx.execute(
            "INSERT INTO record_content (record_id, path, byte_length, mime_type) VALUES (?1, ?2, ?3, ?4)",
            params![record.id, path, byte_length as i64, mime_type],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_content(&self, record_id: &str) -> Result<Option<StoredContent>> {
        let content = self
            .conn
            .query_row(
                "SELECT record_id, path, byte_length, mime_type, stored_at FROM record_content WHERE record_id = ?1",
                params![record_id],
                |row| {
                    Ok(StoredContent {
                        record_id: row.get(0)?,
                        path: row.get(1)?,
                        byte_length: row.get::<_, i64>(2)? as u64,
                        mime_type: row.get(3)?,
                        stored_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(content)
    }
}

fn insert_record(conn: &Connection, record: &Record) -> Result<()> {
    let attributes = serde_json::to_string(&record.attributes)?;
    conn.execute(
        "INSERT INTO records (id, kind, title, resource_uri, attributes) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.id,
            record.kind.as_str(),
            record.title(),
            record.text(attribute::RESOURCE_URI),
            attributes,
        ],
    )?;
    Ok(())
}
