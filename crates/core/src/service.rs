//! The study catalog as seen by presentation layers.
//!
//! [`StudyService`] wires the lifecycle coordinator, the catalog query and the reconciler to
//! one pair of stores and keeps the most recent listing. Any write that got past validation
//! invalidates that listing; a failed query drops it.

use crate::catalog::{CachedListing, CatalogFilter, ListingCache, StudyCatalog};
use crate::config::CoreConfig;
use crate::error::{BackendError, StudyError, StudyResult};
use crate::lifecycle::{Clock, StudyLifecycle};
use crate::path_namer::PathNamer;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::repositories::FileMetadataStore;
use crate::stores::{BlobStore, MetadataStore};
use crate::study::{
    DicomUpload, NewStudy, PreviousFile, StudyEdit, StudyId, StudyRecord, StudyRemoval,
};
use crate::timeout::GuardedStores;
use catalog_files::FilesService;
use serde::Serialize;
use std::sync::Arc;

/// Where to fetch a study's DICOM file and what to call it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudyDownload {
    pub url: String,
    pub file_name: String,
}

/// Entry point for creating, editing, deleting and listing studies.
pub struct StudyService {
    cfg: Arc<CoreConfig>,
    stores: GuardedStores,
    lifecycle: StudyLifecycle,
    catalog: StudyCatalog,
    reconciler: Reconciler,
    listing: ListingCache,
}

impl StudyService {
    /// Opens the filesystem stores under `cfg.data_dir()`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if either store directory cannot be created.
    pub fn open(cfg: Arc<CoreConfig>) -> StudyResult<Self> {
        let blobs = FilesService::open(&cfg.blobs_dir(), cfg.public_base_url().map(String::from))
            .map_err(|e| StudyError::Configuration(e.to_string()))?;
        let metadata = FileMetadataStore::open(&cfg.metadata_dir())
            .map_err(|e| StudyError::Configuration(e.to_string()))?;
        tracing::info!(data_dir = %cfg.data_dir().display(), "opened study catalog");
        Ok(Self::with_stores(cfg, Arc::new(blobs), Arc::new(metadata)))
    }

    /// Builds a service over arbitrary stores.
    pub fn with_stores(
        cfg: Arc<CoreConfig>,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let namer = PathNamer::new(cfg.blob_prefix());
        let timeout = cfg.call_timeout();
        Self {
            stores: GuardedStores::new(blobs.clone(), metadata.clone(), timeout),
            lifecycle: StudyLifecycle::new(
                blobs.clone(),
                metadata.clone(),
                namer.clone(),
                timeout,
            ),
            catalog: StudyCatalog::new(blobs.clone(), metadata.clone(), timeout)
                .with_retries(cfg.query_retries()),
            reconciler: Reconciler::new(blobs, metadata, namer, cfg.orphan_grace(), timeout),
            listing: ListingCache::default(),
            cfg,
        }
    }

    /// Replaces the clock used to timestamp storage paths.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.lifecycle = self.lifecycle.with_clock(clock);
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn create_study(&self, input: NewStudy) -> StudyResult<StudyRecord> {
        let result = self.lifecycle.create(input);
        self.after_write(&result);
        result
    }

    pub fn update_study(&self, edit: StudyEdit) -> StudyResult<StudyRecord> {
        let result = self.lifecycle.update(edit);
        self.after_write(&result);
        result
    }

    pub fn delete_study(&self, removal: StudyRemoval) -> StudyResult<()> {
        let result = self.lifecycle.delete(removal);
        self.after_write(&result);
        result
    }

    /// Updates the study with `id`, taking its current file as the previous one.
    pub fn update_study_by_id(
        &self,
        id: StudyId,
        name: impl Into<String>,
        description: impl Into<String>,
        replacement: Option<DicomUpload>,
    ) -> StudyResult<StudyRecord> {
        let current = self.lifecycle.get(id)?;
        self.update_study(StudyEdit {
            id,
            name: name.into(),
            description: description.into(),
            replacement,
            previous: PreviousFile::from(&current),
        })
    }

    /// Deletes the study with `id` and its current file.
    pub fn delete_study_by_id(&self, id: StudyId) -> StudyResult<()> {
        let current = self.lifecycle.get(id)?;
        self.delete_study(StudyRemoval::from(&current))
    }

    /// Runs a listing query and remembers it as the current listing.
    pub fn list_studies(&self, filter: &CatalogFilter) -> StudyResult<Vec<StudyRecord>> {
        match self.catalog.list(filter) {
            Ok(records) => {
                self.listing.store(filter, &records);
                Ok(records)
            }
            Err(err) => {
                self.listing.clear();
                Err(err)
            }
        }
    }

    /// The last listing, unless a write has happened since.
    pub fn current_listing(&self) -> Option<CachedListing> {
        self.listing.fresh()
    }

    /// Re-runs the last listing's filter, or lists everything if there was none.
    pub fn refresh_listing(&self) -> StudyResult<Vec<StudyRecord>> {
        let filter = self.listing.last_filter().unwrap_or_default();
        self.list_studies(&filter)
    }

    pub fn get_study(&self, id: StudyId) -> StudyResult<StudyRecord> {
        self.lifecycle.get(id)
    }

    /// Resolves the public URL of a study's file without checking that the blob exists.
    pub fn download_url(&self, id: StudyId) -> StudyResult<StudyDownload> {
        let record = self.lifecycle.get(id)?;
        Ok(StudyDownload {
            url: self.stores.blobs.public_url(&record.storage_path),
            file_name: record.file_name.into_inner(),
        })
    }

    /// Reads a study's record and file content.
    ///
    /// # Errors
    ///
    /// `NotFound` if either the record or its blob is missing; `Query` or `Timeout` if a store
    /// cannot be read.
    pub fn read_study_file(&self, id: StudyId) -> StudyResult<(StudyRecord, Vec<u8>)> {
        let record = self.lifecycle.get(id)?;
        let path = record.storage_path.clone();
        let content = self
            .stores
            .on_blobs("blob read", move |b| b.read(&path))
            .map_err(|failure| {
                failure.into_study_error(|err| match err {
                    BackendError::NotFound(path) => StudyError::NotFound(path),
                    other => StudyError::Query(other),
                })
            })?;
        Ok((record, content))
    }

    pub fn reconcile(&self, apply: bool) -> StudyResult<ReconcileReport> {
        let report = self.reconciler.run(apply)?;
        if !report.removed_blobs.is_empty() {
            self.listing.invalidate();
        }
        Ok(report)
    }

    fn after_write<T>(&self, result: &StudyResult<T>) {
        if !matches!(result, Err(StudyError::Validation(_))) {
            self.listing.invalidate();
        }
    }
}
