//! Study records and the inputs of the lifecycle operations.
//!
//! A [`StudyRecord`] is the metadata half of a study; its `storage_path` points at the blob
//! half. The input types (`NewStudy`, `StudyEdit`, `StudyRemoval`) carry raw caller data and
//! are validated by the lifecycle coordinator before any I/O happens.

use catalog_types::{NonEmptyText, StoragePath};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Opaque identifier of a study record, assigned by the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudyId(Uuid);

impl StudyId {
    /// Allocates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for StudyId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StudyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for StudyId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// A catalogued study as held by the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyRecord {
    pub id: StudyId,
    /// Patient/study label shown in listings.
    pub name: NonEmptyText,
    pub description: NonEmptyText,
    /// Key of the DICOM blob in the blob store.
    pub storage_path: StoragePath,
    /// Original name of the uploaded file, used as the download label.
    pub file_name: NonEmptyText,
    /// Set by the metadata store on insert; never changed afterwards.
    pub created_at: DateTime<Utc>,
}

impl StudyRecord {
    /// Applies the fields present in `patch`. `id` and `created_at` are never touched.
    pub fn apply(&mut self, patch: &StudyPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(storage_path) = &patch.storage_path {
            self.storage_path = storage_path.clone();
        }
        if let Some(file_name) = &patch.file_name {
            self.file_name = file_name.clone();
        }
    }
}

/// A record as submitted for insertion, before the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStudyRecord {
    pub name: NonEmptyText,
    pub description: NonEmptyText,
    pub storage_path: StoragePath,
    pub file_name: NonEmptyText,
}

impl NewStudyRecord {
    pub fn into_record(self, id: StudyId, created_at: DateTime<Utc>) -> StudyRecord {
        StudyRecord {
            id,
            name: self.name,
            description: self.description,
            storage_path: self.storage_path,
            file_name: self.file_name,
            created_at,
        }
    }
}

/// Partial update of a record; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyPatch {
    pub name: Option<NonEmptyText>,
    pub description: Option<NonEmptyText>,
    pub storage_path: Option<StoragePath>,
    pub file_name: Option<NonEmptyText>,
}

/// A binary file offered for upload, with the media type the client claimed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DicomUpload {
    pub file_name: String,
    pub media_type: Option<String>,
    pub content: Arc<[u8]>,
}

impl DicomUpload {
    pub fn new(
        file_name: impl Into<String>,
        media_type: Option<String>,
        content: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            media_type,
            content: content.into(),
        }
    }
}

/// Input of the Create operation.
#[derive(Debug, Clone)]
pub struct NewStudy {
    pub name: String,
    pub description: String,
    pub file: Option<DicomUpload>,
}

/// The blob a record pointed at when editing began.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousFile {
    pub storage_path: StoragePath,
    pub file_name: String,
}

impl From<&StudyRecord> for PreviousFile {
    fn from(record: &StudyRecord) -> Self {
        Self {
            storage_path: record.storage_path.clone(),
            file_name: record.file_name.to_string(),
        }
    }
}

/// Input of the Update operation.
#[derive(Debug, Clone)]
pub struct StudyEdit {
    pub id: StudyId,
    pub name: String,
    pub description: String,
    pub replacement: Option<DicomUpload>,
    pub previous: PreviousFile,
}

/// Input of the Delete operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyRemoval {
    pub id: StudyId,
    pub storage_path: StoragePath,
}

impl From<&StudyRecord> for StudyRemoval {
    fn from(record: &StudyRecord) -> Self {
        Self {
            id: record.id,
            storage_path: record.storage_path.clone(),
        }
    }
}
