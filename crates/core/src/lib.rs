//! # Study Catalog Core
//!
//! Core business logic for cataloguing DICOM imaging studies.
//!
//! A study lives in two independently failing stores: the DICOM bytes in a blob store and a
//! [`StudyRecord`] in a metadata store. This crate keeps the two consistent across create,
//! update and delete, and answers filtered listings:
//! - [`StudyLifecycle`] orders the backend calls of each write and compensates on failure
//! - [`StudyCatalog`] runs time-window and name-substring listings, newest first
//! - [`Reconciler`] finds orphan blobs and dangling records left by failure windows
//! - [`StudyService`] puts these together over filesystem stores under `STUDY_DATA_DIR`
//!
//! **No API concerns**: HTTP servers and command-line parsing belong in `api-rest` and `cli`.

pub mod catalog;
pub mod config;
pub mod constants;
pub mod dicom;
pub mod error;
pub mod lifecycle;
pub mod path_namer;
pub mod reconcile;
pub mod repositories;
pub mod service;
pub mod stores;
pub mod study;
mod timeout;

#[cfg(test)]
mod test_support;

pub use catalog::{CachedListing, CatalogFilter, DateLabel, StudyCatalog, TimeFilter};
pub use catalog_types::{NonEmptyText, StoragePath, TextError};
pub use config::CoreConfig;
pub use dicom::{classify_as_dicom, DicomEvidence};
pub use error::{BackendError, BackendResult, StudyError, StudyErrorKind, StudyResult};
pub use lifecycle::{Clock, StudyLifecycle};
pub use path_namer::PathNamer;
pub use reconcile::{ReconcileReport, Reconciler};
pub use repositories::FileMetadataStore;
pub use service::{StudyDownload, StudyService};
pub use stores::{BlobStore, MetadataStore, StudyQuery, UploadOptions};
pub use study::{
    DicomUpload, NewStudy, NewStudyRecord, PreviousFile, StudyEdit, StudyId, StudyPatch,
    StudyRecord, StudyRemoval,
};
