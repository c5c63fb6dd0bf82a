//! Filesystem-backed implementations of the study stores.
//!
//! Blobs live under `<data_dir>/blobs` via [`catalog_files::FilesService`]; study records live
//! as one JSON document each under `<data_dir>/metadata`.

pub mod blobs;
pub mod metadata;

pub use metadata::FileMetadataStore;
