//! In-memory catalog with scripted failures, for tests.

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;

use super::{
    attribute, CatalogError, CatalogFramework, ContentCreateRequest, CreateRequest, Record,
    RecordKind, UpdateRequest,
};

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<String, Record>,
    next_id: u64,
    create_calls: usize,
    content_calls: usize,
    update_calls: Vec<String>,
    content_bytes: Vec<u64>,
    create_failures: VecDeque<CatalogError>,
    content_failures: VecDeque<CatalogError>,
    update_failures: VecDeque<CatalogError>,
    /// Attribute discarded from records passed to `create_content`.
    dropped_on_content: Option<&'static str>,
}

/// Catalog double recording every call.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    inner: Mutex<Inner>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_create(&self, error: CatalogError) {
        self.inner.lock().create_failures.push_back(error);
    }

    pub fn fail_next_content_create(&self, error: CatalogError) {
        self.inner.lock().content_failures.push_back(error);
    }

    pub fn fail_next_update(&self, error: CatalogError) {
        self.inner.lock().update_failures.push_back(error);
    }

    /// Simulate a catalog that does not keep `name` on ingested content.
    pub fn drop_attribute_on_content(&self, name: &'static str) {
        self.inner.lock().dropped_on_content = Some(name);
    }

    pub fn create_calls(&self) -> usize {
        self.inner.lock().create_calls
    }

    pub fn content_calls(&self) -> usize {
        self.inner.lock().content_calls
    }

    /// Ids passed to `update`, in call order, including failed calls.
    pub fn update_calls(&self) -> Vec<String> {
        self.inner.lock().update_calls.clone()
    }

    /// Byte length of every stored chunk, in commit order.
    pub fn content_bytes(&self) -> Vec<u64> {
        self.inner.lock().content_bytes.clone()
    }

    pub fn records(&self, kind: RecordKind) -> Vec<Record> {
        self.inner
            .lock()
            .records
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    fn store(inner: &mut Inner, mut record: Record) -> Record {
        if record.id.is_empty() {
            inner.next_id += 1;
            record.id = format!("{}-{}", record.kind.as_str(), inner.next_id);
        }
        inner.records.insert(record.id.clone(), record.clone());
        record
    }
}

impl CatalogFramework for MemoryCatalog {
    fn create(&self, request: CreateRequest) -> Result<Record, CatalogError> {
        let mut inner = self.inner.lock();
        inner.create_calls += 1;
        if let Some(e) = inner.create_failures.pop_front() {
            return Err(e);
        }
        Ok(Self::store(&mut inner, request.record))
    }

    fn create_content(&self, request: ContentCreateRequest) -> Result<Record, CatalogError> {
        let bytes = std::fs::metadata(&request.content_path)
            .map(|m| m.len())
            .map_err(|e| CatalogError::Rejected(e.to_string()))?;

        let mut inner = self.inner.lock();
        inner.content_calls += 1;
        if let Some(e) = inner.content_failures.pop_front() {
            return Err(e);
        }
        inner.content_bytes.push(bytes);
        let mut record = request.record;
        if let Some(name) = inner.dropped_on_content {
            record.attributes.remove(name);
        }
        record.set(
            attribute::RESOURCE_SIZE,
            super::AttributeValue::Integer(bytes as i64),
        );
        Ok(Self::store(&mut inner, record))
    }

    fn update(&self, request: UpdateRequest) -> Result<Record, CatalogError> {
        let mut inner = self.inner.lock();
        inner.update_calls.push(request.id.clone());
        if let Some(e) = inner.update_failures.pop_front() {
            return Err(e);
        }
        let record = inner
            .records
            .get_mut(&request.id)
            .ok_or_else(|| CatalogError::Rejected(format!("no record {}", request.id)))?;
        record.attributes.extend(request.attributes);
        Ok(record.clone())
    }

    fn get(&self, id: &str) -> Result<Option<Record>, CatalogError> {
        Ok(self.inner.lock().records.get(id).cloned())
    }
}
