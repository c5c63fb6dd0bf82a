//! Study Catalog Blob Storage
//!
//! This crate stores the binary DICOM files of the study catalog on a local filesystem.
//!
//! ## Design Principles
//!
//! - Blobs are addressed by a relative [`StoragePath`], never by an absolute filesystem path
//! - Writes are non-overwriting unless the caller asks otherwise
//! - Blob bytes and study metadata live in separate stores that fail independently
//! - A blob carries no patient metadata of its own beyond its path
//!
//! ## Layout
//!
//! ```text
//! <data_dir>/
//! └── blobs/
//!     └── dicom_files/
//!         └── Jane_Doe-1718000000000/
//!             └── scan.dcm
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use catalog_files::{FilesService, WriteMode};
//! use catalog_types::StoragePath;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = FilesService::open(Path::new("study_data/blobs"), None)?;
//! let path = StoragePath::new("dicom_files/Jane_Doe-1718000000000/scan.dcm")?;
//! let stored = service.write(&path, b"DICM", WriteMode::CreateNew)?;
//! println!("{} ({} bytes)", stored.path, stored.size_bytes);
//! # Ok(())
//! # }
//! ```

mod files;

pub use catalog_types::StoragePath;
pub use files::{FilesService, StoredBlob, WriteMode};

/// Name of the directory under the data directory that holds blobs.
pub const BLOBS_FOLDER_NAME: &str = "blobs";

/// Errors that can occur during blob operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Root directory could not be created or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// A blob already exists at the requested path and overwrite was not requested
    #[error("Blob already exists at {0}")]
    BlobAlreadyExists(String),

    /// No blob exists at the requested path
    #[error("Blob not found at {0}")]
    BlobNotFound(String),

    /// A listing prefix was not a safe relative path
    #[error("Invalid prefix: {0}")]
    InvalidPrefix(String),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
