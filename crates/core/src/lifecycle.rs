//! # Study lifecycle
//!
//! Keeps a study's metadata record and its DICOM blob consistent across create, update and
//! delete. The two stores share no transaction, so each operation is an ordered sequence of
//! backend calls with a compensation list:
//!
//! - **Create**: upload the blob, then insert the record. If the insert fails the new blob is
//!   removed again.
//! - **Update with a replacement file**: upload the new blob, then update the record, then
//!   remove the superseded blob. The old blob is only touched after the record points away
//!   from it; failing to remove it is a warning, never an error.
//! - **Delete**: remove the blob, then the record. A failed blob removal keeps the record. A
//!   failed record removal after the blob is gone is reported as a consistency gap.
//!
//! All input is validated before the first backend call. Every backend call runs under the
//! configured deadline; a call that times out has an unknown outcome, so no compensation is
//! attempted for it and [`crate::reconcile`] is left to collect what it leaves behind.

use crate::dicom::classify_as_dicom;
use crate::error::{BackendError, StudyError, StudyResult};
use crate::path_namer::PathNamer;
use crate::stores::{BlobStore, MetadataStore, UploadOptions};
use crate::study::{
    DicomUpload, NewStudy, NewStudyRecord, StudyEdit, StudyId, StudyPatch, StudyRecord,
    StudyRemoval,
};
use crate::timeout::{CallFailure, GuardedStores};
use catalog_types::{NonEmptyText, StoragePath};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Source of "now" for path derivation.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Coordinates create, update and delete across the blob and metadata stores.
///
/// The coordinator is the only writer of study records. It holds no state of its own beyond
/// its collaborators and may be shared across threads.
#[derive(Clone)]
pub struct StudyLifecycle {
    stores: GuardedStores,
    namer: PathNamer,
    clock: Clock,
}

impl StudyLifecycle {
    /// Creates a coordinator over the given stores.
    ///
    /// # Arguments
    ///
    /// * `blobs` - Store holding DICOM bytes.
    /// * `metadata` - Store holding study records.
    /// * `namer` - Derives storage paths for new blobs.
    /// * `call_timeout` - Deadline for each backend call; `None` waits indefinitely.
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        namer: PathNamer,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            stores: GuardedStores::new(blobs, metadata, call_timeout),
            namer,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the wall clock used for path derivation.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn namer(&self) -> &PathNamer {
        &self.namer
    }

    /// Catalogs a new study: stores its DICOM file, then records its metadata.
    ///
    /// # Errors
    ///
    /// - `Validation` if the name or description is blank, the file is missing or empty, or
    ///   the file is not DICOM. No backend is called.
    /// - `StorageWrite` if the upload fails. Nothing is left behind.
    /// - `MetadataWrite` if the insert fails. The uploaded blob is removed again.
    /// - `Timeout` if a backend call exceeds its deadline.
    pub fn create(&self, input: NewStudy) -> StudyResult<StudyRecord> {
        let (name, description) = validate_fields(&input.name, &input.description)?;
        let file = input
            .file
            .ok_or_else(|| StudyError::Validation("a DICOM file is required".into()))?;
        let file_name = validate_file(&file)?;
        let storage_path = self.derive_path(&name, &file_name)?;

        let mut saga = Saga::new("create", &self.stores);
        self.upload(&storage_path, &file)?;
        saga.register(Compensation::RemoveUploadedBlob(storage_path.clone()));

        let record = NewStudyRecord {
            name,
            description,
            storage_path,
            file_name,
        };
        match self
            .stores
            .on_metadata("metadata insert", move |m| m.insert(record))
        {
            Ok(created) => {
                saga.commit();
                tracing::info!(
                    study_id = %created.id,
                    storage_path = %created.storage_path,
                    "study created"
                );
                Ok(created)
            }
            Err(failure) => Err(saga.abandon(failure, StudyError::MetadataWrite)),
        }
    }

    /// Edits a study's name and description, optionally replacing its DICOM file.
    ///
    /// `edit.previous` is the blob the caller saw when editing began. With a replacement file
    /// that blob is removed after the record points at the new one.
    ///
    /// # Errors
    ///
    /// - `Validation` for blank fields or a non-DICOM replacement. No backend is called.
    /// - `NotFound` if no record has `edit.id`.
    /// - `StorageWrite` if the replacement upload fails. The record is untouched.
    /// - `MetadataWrite` if the record update fails. A replacement blob is removed again.
    /// - `Query` if the record lookup fails.
    /// - `Timeout` if a backend call exceeds its deadline.
    pub fn update(&self, edit: StudyEdit) -> StudyResult<StudyRecord> {
        let (name, description) = validate_fields(&edit.name, &edit.description)?;
        let replacement = match &edit.replacement {
            Some(file) => {
                let file_name = validate_file(file)?;
                let new_path = self.derive_path(&name, &file_name)?;
                Some((file, file_name, new_path))
            }
            None => None,
        };

        let mut current = self.require(edit.id)?;
        if current.storage_path != edit.previous.storage_path {
            tracing::warn!(
                study_id = %edit.id,
                stored = %current.storage_path,
                previous = %edit.previous.storage_path,
                "record changed since editing began"
            );
        }

        let Some((file, file_name, new_path)) = replacement else {
            let patch = StudyPatch {
                name: Some(name),
                description: Some(description),
                ..StudyPatch::default()
            };
            self.patch(edit.id, &patch)
                .map_err(|failure| failure.into_study_error(metadata_write_error(edit.id)))?;
            current.apply(&patch);
            tracing::info!(study_id = %edit.id, "study updated");
            return Ok(current);
        };

        let mut saga = Saga::new("update", &self.stores);
        self.upload(&new_path, file)?;
        saga.register(Compensation::RemoveUploadedBlob(new_path.clone()));

        let patch = StudyPatch {
            name: Some(name),
            description: Some(description),
            storage_path: Some(new_path.clone()),
            file_name: Some(file_name),
        };
        if let Err(failure) = self.patch(edit.id, &patch) {
            return Err(saga.abandon(failure, metadata_write_error(edit.id)));
        }
        saga.commit();
        current.apply(&patch);

        let old_path = edit.previous.storage_path;
        if old_path != new_path {
            let target = old_path.clone();
            if let Err(failure) = self
                .stores
                .on_blobs("blob remove", move |b| b.remove(&target))
            {
                tracing::warn!(
                    study_id = %edit.id,
                    storage_path = %old_path,
                    error = ?failure,
                    "could not remove superseded DICOM file; left for reconciliation"
                );
            }
        }

        tracing::info!(
            study_id = %edit.id,
            storage_path = %new_path,
            "study updated with replacement file"
        );
        Ok(current)
    }

    /// Removes a study: its DICOM file first, then its record.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no record has `removal.id`.
    /// - `StorageDelete` if the blob cannot be removed, including when it is already missing.
    ///   The record is kept.
    /// - `MetadataDelete` if the record cannot be removed after the blob is gone. The record
    ///   now references a missing blob until reconciled.
    /// - `Query` if the record lookup fails.
    /// - `Timeout` if a backend call exceeds its deadline.
    pub fn delete(&self, removal: StudyRemoval) -> StudyResult<()> {
        let current = self.require(removal.id)?;
        if current.storage_path != removal.storage_path {
            tracing::warn!(
                study_id = %removal.id,
                stored = %current.storage_path,
                requested = %removal.storage_path,
                "delete requested for a path the record no longer holds"
            );
        }

        let target = removal.storage_path.clone();
        self.stores
            .on_blobs("blob remove", move |b| b.remove(&target))
            .map_err(|failure| failure.into_study_error(StudyError::StorageDelete))?;

        let id = removal.id;
        match self.stores.on_metadata("metadata delete", move |m| m.delete(&id)) {
            Ok(()) => {
                tracing::info!(
                    study_id = %removal.id,
                    storage_path = %removal.storage_path,
                    "study deleted"
                );
                Ok(())
            }
            Err(CallFailure::Backend(BackendError::NotFound(_))) => {
                Err(StudyError::NotFound(removal.id.to_string()))
            }
            Err(failure) => {
                tracing::error!(
                    study_id = %removal.id,
                    storage_path = %removal.storage_path,
                    error = ?failure,
                    "DICOM file removed but study record remains"
                );
                Err(failure.into_study_error(StudyError::MetadataDelete))
            }
        }
    }

    /// Fetches one record.
    pub fn get(&self, id: StudyId) -> StudyResult<StudyRecord> {
        self.require(id)
    }

    fn require(&self, id: StudyId) -> StudyResult<StudyRecord> {
        self.stores
            .on_metadata("metadata lookup", move |m| m.get(&id))
            .map_err(|failure| failure.into_study_error(StudyError::Query))?
            .ok_or_else(|| StudyError::NotFound(id.to_string()))
    }

    fn derive_path(&self, name: &NonEmptyText, file_name: &NonEmptyText) -> StudyResult<StoragePath> {
        let raw = self
            .namer
            .derive(name.as_str(), file_name.as_str(), (self.clock)());
        let path = StoragePath::new(raw.as_str())
            .map_err(|e| StudyError::Validation(format!("cannot store study under {raw:?}: {e}")))?;
        if self.namer.derived_at(&path).is_none() {
            return Err(StudyError::Validation(format!(
                "name {:?} cannot be used in a storage path",
                name.as_str()
            )));
        }
        Ok(path)
    }

    fn upload(&self, path: &StoragePath, file: &DicomUpload) -> StudyResult<()> {
        let target = path.clone();
        let content = Arc::clone(&file.content);
        self.stores
            .on_blobs("blob upload", move |b| {
                b.upload(&target, &content, UploadOptions { overwrite: false })
            })
            .map_err(|failure| {
                if let CallFailure::TimedOut { .. } = failure {
                    tracing::warn!(
                        storage_path = %path,
                        "upload outcome unknown; a late write is left for reconciliation"
                    );
                }
                failure.into_study_error(StudyError::StorageWrite)
            })
    }

    fn patch(&self, id: StudyId, patch: &StudyPatch) -> Result<(), CallFailure> {
        let patch = patch.clone();
        self.stores
            .on_metadata("metadata update", move |m| m.update(&id, &patch))
    }
}

/// A record that vanished mid-update is `NotFound`; anything else is a write failure.
fn metadata_write_error(id: StudyId) -> impl FnOnce(BackendError) -> StudyError {
    move |err| match err {
        BackendError::NotFound(_) => StudyError::NotFound(id.to_string()),
        other => StudyError::MetadataWrite(other),
    }
}

fn validate_fields(name: &str, description: &str) -> StudyResult<(NonEmptyText, NonEmptyText)> {
    let name = NonEmptyText::new(name)
        .map_err(|_| StudyError::Validation("name must not be empty".into()))?;
    let description = NonEmptyText::new(description)
        .map_err(|_| StudyError::Validation("description must not be empty".into()))?;
    Ok((name, description))
}

/// Checks an upload and returns its file name.
fn validate_file(file: &DicomUpload) -> StudyResult<NonEmptyText> {
    let file_name = NonEmptyText::new(&file.file_name)
        .map_err(|_| StudyError::Validation("file name must not be empty".into()))?;
    if file_name.as_str().contains(['/', '\\']) {
        return Err(StudyError::Validation(format!(
            "file name {:?} must not contain path separators",
            file_name.as_str()
        )));
    }
    if file.content.is_empty() {
        return Err(StudyError::Validation(format!(
            "file {:?} is empty",
            file_name.as_str()
        )));
    }
    if !classify_as_dicom(file) {
        return Err(StudyError::Validation(format!(
            "file {:?} is not a DICOM file",
            file_name.as_str()
        )));
    }
    Ok(file_name)
}

/// Undo action for a completed step.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Compensation {
    RemoveUploadedBlob(StoragePath),
}

/// Compensations registered by the steps completed so far.
struct Saga<'a> {
    operation: &'static str,
    stores: &'a GuardedStores,
    pending: Vec<Compensation>,
}

impl<'a> Saga<'a> {
    fn new(operation: &'static str, stores: &'a GuardedStores) -> Self {
        Self {
            operation,
            stores,
            pending: Vec::new(),
        }
    }

    fn register(&mut self, compensation: Compensation) {
        self.pending.push(compensation);
    }

    fn commit(mut self) {
        self.pending.clear();
    }

    /// Handles a failed step: rolls back unless the step timed out, then maps the failure.
    ///
    /// A timed-out step may still complete, so undoing earlier steps could leave a record
    /// pointing at a removed blob. The compensations are skipped and logged instead.
    fn abandon(
        self,
        failure: CallFailure,
        map: impl FnOnce(BackendError) -> StudyError,
    ) -> StudyError {
        if let CallFailure::TimedOut { .. } = failure {
            tracing::warn!(
                operation = self.operation,
                pending = ?self.pending,
                "step outcome unknown; skipping compensation"
            );
        } else {
            self.roll_back();
        }
        failure.into_study_error(map)
    }

    fn roll_back(self) {
        for compensation in self.pending.into_iter().rev() {
            match compensation {
                Compensation::RemoveUploadedBlob(path) => {
                    tracing::warn!(
                        operation = self.operation,
                        storage_path = %path,
                        "removing uploaded DICOM file after failed metadata write"
                    );
                    let target = path.clone();
                    if let Err(failure) = self
                        .stores
                        .on_blobs("blob remove", move |b| b.remove(&target))
                    {
                        tracing::error!(
                            operation = self.operation,
                            storage_path = %path,
                            error = ?failure,
                            "compensation failed; DICOM file is orphaned"
                        );
                    }
                }
            }
        }
    }
}
