//! The two backends a study spans.
//!
//! [`BlobStore`] holds DICOM bytes by [`StoragePath`]; [`MetadataStore`] holds
//! [`StudyRecord`]s. They fail independently and share no transaction, which is why every
//! multi-step operation goes through the lifecycle coordinator.
//!
//! Both traits are object safe and `Send + Sync` so that calls can be moved onto a worker thread
//! and abandoned when they outlive their deadline.

use crate::error::BackendResult;
use crate::study::{NewStudyRecord, StudyId, StudyPatch, StudyRecord};
use catalog_types::StoragePath;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Replace an existing blob instead of failing with `AlreadyExists`.
    pub overwrite: bool,
}

pub trait BlobStore: Send + Sync {
    fn upload(
        &self,
        path: &StoragePath,
        content: &[u8],
        options: UploadOptions,
    ) -> BackendResult<()>;

    /// Fails with `NotFound` if nothing is stored at `path`.
    fn remove(&self, path: &StoragePath) -> BackendResult<()>;

    fn read(&self, path: &StoragePath) -> BackendResult<Vec<u8>>;

    fn exists(&self, path: &StoragePath) -> BackendResult<bool>;

    /// Lists every key under `prefix`.
    fn list(&self, prefix: &str) -> BackendResult<Vec<StoragePath>>;

    /// Derives a public URL for `path` without checking that the blob exists.
    fn public_url(&self, path: &StoragePath) -> String;
}

pub trait MetadataStore: Send + Sync {
    /// Inserts a record, assigning its `id` and `created_at`.
    fn insert(&self, record: NewStudyRecord) -> BackendResult<StudyRecord>;

    fn get(&self, id: &StudyId) -> BackendResult<Option<StudyRecord>>;

    /// Fails with `NotFound` if no record has `id`.
    fn update(&self, id: &StudyId, patch: &StudyPatch) -> BackendResult<()>;

    /// Fails with `NotFound` if no record has `id`.
    fn delete(&self, id: &StudyId) -> BackendResult<()>;

    /// Returns the matching records, newest `created_at` first.
    fn query(&self, query: &StudyQuery) -> BackendResult<Vec<StudyRecord>>;
}

/// Filters understood by every [`MetadataStore`].
///
/// Stores that cannot push these filters down may apply [`StudyQuery::matches`] and
/// [`StudyQuery::order`] themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudyQuery {
    /// Inclusive lower bound on `created_at`.
    pub created_since: Option<DateTime<Utc>>,
    /// Case-insensitive substring of `name`. Matched literally; no wildcards.
    pub name_contains: Option<String>,
}

impl StudyQuery {
    pub fn matches(&self, record: &StudyRecord) -> bool {
        if let Some(since) = self.created_since {
            if record.created_at < since {
                return false;
            }
        }
        match self.name_contains.as_deref() {
            Some(needle) if !needle.is_empty() => record
                .name
                .as_str()
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        }
    }

    /// Sorts newest first. Ties fall back to `id` so the order is stable across calls.
    pub fn order(records: &mut [StudyRecord]) {
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
    }
}
