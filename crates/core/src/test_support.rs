//! In-memory stores with fault injection, for unit tests.

use crate::error::{BackendError, BackendResult};
use crate::stores::{BlobStore, MetadataStore, StudyQuery, UploadOptions};
use crate::study::{NewStudyRecord, StudyId, StudyPatch, StudyRecord};
use catalog_types::{NonEmptyText, StoragePath};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Which operations should fail or stall, and how many more times.
#[derive(Default)]
struct Faults {
    failures: Mutex<HashMap<&'static str, u32>>,
    stalls: Mutex<HashMap<&'static str, Duration>>,
    calls: Mutex<Vec<String>>,
}

impl Faults {
    fn fail(&self, op: &'static str, times: u32) {
        lock(&self.failures).insert(op, times);
    }

    fn stall(&self, op: &'static str, delay: Duration) {
        lock(&self.stalls).insert(op, delay);
    }

    /// Records the call, sleeps if stalled, and returns an error if a failure is pending.
    fn enter(&self, op: &'static str, subject: &str) -> BackendResult<()> {
        lock(&self.calls).push(format!("{op} {subject}"));
        let stall = lock(&self.stalls).get(op).copied();
        if let Some(delay) = stall {
            std::thread::sleep(delay);
        }
        let mut failures = lock(&self.failures);
        match failures.get_mut(op) {
            Some(0) | None => Ok(()),
            Some(remaining) => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                Err(BackendError::Unavailable(format!("injected {op} failure")))
            }
        }
    }

    fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[derive(Default)]
pub(crate) struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<StoragePath, Vec<u8>>>,
    faults: Faults,
}

impl MemoryBlobStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes `op` ("upload", "remove", "read", "exists", "list") fail from now on.
    pub(crate) fn fail(&self, op: &'static str) {
        self.faults.fail(op, u32::MAX);
    }

    pub(crate) fn stall(&self, op: &'static str, delay: Duration) {
        self.faults.stall(op, delay);
    }

    pub(crate) fn put(&self, path: &str, content: &[u8]) {
        lock(&self.blobs).insert(StoragePath::new(path).unwrap(), content.to_vec());
    }

    pub(crate) fn get(&self, path: &StoragePath) -> Option<Vec<u8>> {
        lock(&self.blobs).get(path).cloned()
    }

    pub(crate) fn paths(&self) -> Vec<StoragePath> {
        lock(&self.blobs).keys().cloned().collect()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.faults.calls()
    }
}

impl BlobStore for MemoryBlobStore {
    fn upload(
        &self,
        path: &StoragePath,
        content: &[u8],
        options: UploadOptions,
    ) -> BackendResult<()> {
        self.faults.enter("upload", path.as_str())?;
        let mut blobs = lock(&self.blobs);
        if !options.overwrite && blobs.contains_key(path) {
            return Err(BackendError::AlreadyExists(path.to_string()));
        }
        blobs.insert(path.clone(), content.to_vec());
        Ok(())
    }

    fn remove(&self, path: &StoragePath) -> BackendResult<()> {
        self.faults.enter("remove", path.as_str())?;
        lock(&self.blobs)
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(path.to_string()))
    }

    fn read(&self, path: &StoragePath) -> BackendResult<Vec<u8>> {
        self.faults.enter("read", path.as_str())?;
        self.get(path)
            .ok_or_else(|| BackendError::NotFound(path.to_string()))
    }

    fn exists(&self, path: &StoragePath) -> BackendResult<bool> {
        self.faults.enter("exists", path.as_str())?;
        Ok(lock(&self.blobs).contains_key(path))
    }

    fn list(&self, prefix: &str) -> BackendResult<Vec<StoragePath>> {
        self.faults.enter("list", prefix)?;
        Ok(lock(&self.blobs)
            .keys()
            .filter(|p| p.has_prefix(prefix))
            .cloned()
            .collect())
    }

    fn public_url(&self, path: &StoragePath) -> String {
        format!("memory://studies/{path}")
    }
}

pub(crate) struct MemoryMetadataStore {
    rows: Mutex<Vec<StudyRecord>>,
    faults: Faults,
}

impl MemoryMetadataStore {
    pub(crate) fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            faults: Faults::default(),
        }
    }

    /// Makes `op` ("insert", "get", "update", "delete", "query") fail from now on.
    pub(crate) fn fail(&self, op: &'static str) {
        self.faults.fail(op, u32::MAX);
    }

    pub(crate) fn fail_times(&self, op: &'static str, times: u32) {
        self.faults.fail(op, times);
    }

    pub(crate) fn stall(&self, op: &'static str, delay: Duration) {
        self.faults.stall(op, delay);
    }

    /// Inserts a record directly, bypassing fault injection.
    pub(crate) fn seed(
        &self,
        name: &str,
        storage_path: &str,
        created_at: DateTime<Utc>,
    ) -> StudyRecord {
        let file_name = storage_path.rsplit('/').next().unwrap_or(storage_path);
        let record = StudyRecord {
            id: StudyId::new(),
            name: NonEmptyText::new(name).unwrap(),
            description: NonEmptyText::new("seeded").unwrap(),
            storage_path: StoragePath::new(storage_path).unwrap(),
            file_name: NonEmptyText::new(file_name).unwrap(),
            created_at,
        };
        lock(&self.rows).push(record.clone());
        record
    }

    pub(crate) fn rows(&self) -> Vec<StudyRecord> {
        lock(&self.rows).clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.faults.calls()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn insert(&self, record: NewStudyRecord) -> BackendResult<StudyRecord> {
        self.faults.enter("insert", record.name.as_str())?;
        let record = record.into_record(StudyId::new(), Utc::now());
        lock(&self.rows).push(record.clone());
        Ok(record)
    }

    fn get(&self, id: &StudyId) -> BackendResult<Option<StudyRecord>> {
        self.faults.enter("get", &id.to_string())?;
        Ok(lock(&self.rows).iter().find(|r| r.id == *id).cloned())
    }

    fn update(&self, id: &StudyId, patch: &StudyPatch) -> BackendResult<()> {
        self.faults.enter("update", &id.to_string())?;
        let mut rows = lock(&self.rows);
        let row = rows
            .iter_mut()
            .find(|r| r.id == *id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        row.apply(patch);
        Ok(())
    }

    fn delete(&self, id: &StudyId) -> BackendResult<()> {
        self.faults.enter("delete", &id.to_string())?;
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|r| r.id != *id);
        if rows.len() == before {
            return Err(BackendError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn query(&self, query: &StudyQuery) -> BackendResult<Vec<StudyRecord>> {
        self.faults.enter("query", "")?;
        let mut found: Vec<_> = lock(&self.rows)
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        StudyQuery::order(&mut found);
        Ok(found)
    }
}

/// Calls whose text starts with one of the write operations.
pub(crate) fn write_calls(calls: &[String]) -> Vec<String> {
    calls
        .iter()
        .filter(|c| {
            ["upload", "remove", "insert", "update", "delete"]
                .iter()
                .any(|op| c.starts_with(op))
        })
        .cloned()
        .collect()
}
