//! SQLite-backed catalog.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use uuid::Uuid;

use super::{
    attribute, AttributeValue, CatalogError, CatalogFramework, ContentCreateRequest,
    CreateRequest, Record, UpdateRequest,
};
use crate::database::DatabaseError;
use crate::DatabaseHandle;

/// Catalog storing records in SQLite and content files in a directory.
///
/// Must only be called from blocking contexts; it takes the database lock
/// with `blocking_lock`.
pub struct SqliteCatalog {
    database: DatabaseHandle,
    content_dir: PathBuf,
}

impl SqliteCatalog {
    pub fn new(database: DatabaseHandle, content_dir: impl Into<PathBuf>) -> Self {
        Self {
            database,
            content_dir: content_dir.into(),
        }
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    fn assign_id(record: &mut Record) {
        if record.id.is_empty() {
            record.id = Uuid::new_v4().simple().to_string();
        }
    }
}

impl From<DatabaseError> for CatalogError {
    fn from(e: DatabaseError) -> Self {
        if e.is_busy() {
            CatalogError::Unavailable(e.to_string())
        } else {
            CatalogError::Rejected(e.to_string())
        }
    }
}

impl CatalogFramework for SqliteCatalog {
    fn create(&self, request: CreateRequest) -> Result<Record, CatalogError> {
        let mut record = request.record;
        Self::assign_id(&mut record);

        let db = self.database.blocking_lock();
        db.insert_record(&record)?;
        debug!("[Catalog] Created {} record {}", record.kind.as_str(), record.id);
        Ok(record)
    }

    fn create_content(&self, request: ContentCreateRequest) -> Result<Record, CatalogError> {
        let mut record = request.record;
        Self::assign_id(&mut record);

        fs::create_dir_all(&self.content_dir)
            .map_err(|e| CatalogError::Unavailable(format!("content directory: {}", e)))?;
        let stored = self.content_dir.join(format!("{}.ts", record.id));
        let byte_length = fs::copy(&request.content_path, &stored).map_err(|e| {
            CatalogError::Rejected(format!(
                "cannot store {}: {}",
                request.content_path.display(),
                e
            ))
        })?;

        record.set(
            attribute::RESOURCE_URI,
            AttributeValue::Text(format!("content:{}", record.id)),
        );
        record.set(
            attribute::RESOURCE_SIZE,
            AttributeValue::Integer(byte_length as i64),
        );

        let mut db = self.database.blocking_lock();
        let stored_path = stored.to_string_lossy();
        if let Err(e) =
            db.insert_record_with_content(&record, &stored_path, byte_length, &request.mime_type)
        {
            if let Err(rm) = fs::remove_file(&stored) {
                warn!("[Catalog] Failed to remove {}: {}", stored.display(), rm);
            }
            return Err(e.into());
        }

        debug!(
            "[Catalog] Stored {} ({} bytes) as {}",
            request.filename, byte_length, record.id
        );
        Ok(record)
    }

    fn update(&self, request: UpdateRequest) -> Result<Record, CatalogError> {
        let db = self.database.blocking_lock();
        Ok(db.update_record_attributes(&request.id, &request.attributes)?)
    }

    fn get(&self, id: &str) -> Result<Option<Record>, CatalogError> {
        let db = self.database.blocking_lock();
        Ok(db.get_record(id)?)
    }
}
