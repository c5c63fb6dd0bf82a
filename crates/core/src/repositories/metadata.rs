//! Study records stored as JSON documents on the filesystem.
//!
//! ```text
//! <data_dir>/metadata/
//! ├── 0b8c3f1e-....json
//! └── 7d41a9c2-....json
//! ```
//!
//! Each write goes to a temporary file in the same directory and is renamed into place, so a
//! reader never sees a half-written record. Writers are serialised by a process-local lock;
//! there is no cross-process locking.

use crate::error::{BackendError, BackendResult};
use crate::stores::{MetadataStore, StudyQuery};
use crate::study::{NewStudyRecord, StudyId, StudyPatch, StudyRecord};
use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const RECORD_EXTENSION: &str = "json";
const STAGING_PREFIX: &str = ".staging-";

/// [`MetadataStore`] keeping one JSON file per study record.
#[derive(Debug)]
pub struct FileMetadataStore {
    directory: PathBuf,
    write_lock: Mutex<()>,
}

impl FileMetadataStore {
    /// Opens the store, creating `directory` if needed.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the directory cannot be created.
    pub fn open(directory: &Path) -> BackendResult<Self> {
        fs::create_dir_all(directory).map_err(|e| {
            BackendError::Unavailable(format!(
                "cannot create metadata directory {}: {e}",
                directory.display()
            ))
        })?;
        Ok(Self {
            directory: directory.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_path(&self, id: &StudyId) -> PathBuf {
        self.directory.join(format!("{id}.{RECORD_EXTENSION}"))
    }

    fn load(&self, path: &Path) -> BackendResult<StudyRecord> {
        let bytes = fs::read(path).map_err(|e| unavailable(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            BackendError::Unavailable(format!("corrupt study record {}: {e}", path.display()))
        })
    }

    fn save(&self, record: &StudyRecord) -> BackendResult<()> {
        let target = self.record_path(&record.id);
        let staging = self
            .directory
            .join(format!("{STAGING_PREFIX}{}.{RECORD_EXTENSION}", record.id));
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| BackendError::Rejected(format!("cannot encode study record: {e}")))?;

        let written = fs::File::create(&staging)
            .and_then(|mut file| {
                file.write_all(&json)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&staging, &target));
        if let Err(e) = written {
            let _ = fs::remove_file(&staging);
            return Err(unavailable(&target, e));
        }
        Ok(())
    }
}

fn unavailable(path: &Path, err: std::io::Error) -> BackendError {
    BackendError::Unavailable(format!("{}: {err}", path.display()))
}

impl MetadataStore for FileMetadataStore {
    fn insert(&self, record: NewStudyRecord) -> BackendResult<StudyRecord> {
        let _guard = self.lock();
        let record = record.into_record(StudyId::new(), Utc::now());
        if self.record_path(&record.id).exists() {
            return Err(BackendError::AlreadyExists(record.id.to_string()));
        }
        self.save(&record)?;
        Ok(record)
    }

    fn get(&self, id: &StudyId) -> BackendResult<Option<StudyRecord>> {
        let path = self.record_path(id);
        if !path.is_file() {
            return Ok(None);
        }
        self.load(&path).map(Some)
    }

    fn update(&self, id: &StudyId, patch: &StudyPatch) -> BackendResult<()> {
        let _guard = self.lock();
        let path = self.record_path(id);
        if !path.is_file() {
            return Err(BackendError::NotFound(id.to_string()));
        }
        let mut record = self.load(&path)?;
        record.apply(patch);
        self.save(&record)
    }

    fn delete(&self, id: &StudyId) -> BackendResult<()> {
        let _guard = self.lock();
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackendError::NotFound(id.to_string()))
            }
            Err(e) => Err(unavailable(&path, e)),
        }
    }

    /// Scans every record. Unreadable records are logged as warnings and skipped.
    fn query(&self, query: &StudyQuery) -> BackendResult<Vec<StudyRecord>> {
        let entries = fs::read_dir(&self.directory).map_err(|e| unavailable(&self.directory, e))?;

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == RECORD_EXTENSION)
                && !entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX);
            if !is_record || !path.is_file() {
                continue;
            }
            match self.load(&path) {
                Ok(record) if query.matches(&record) => found.push(record),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("skipping study record {}: {}", path.display(), e);
                }
            }
        }

        StudyQuery::order(&mut found);
        Ok(found)
    }
}
