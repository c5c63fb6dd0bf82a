//! Constants used throughout the catalog core crate.

/// Default directory holding both the blob store and the metadata store.
pub const DEFAULT_STUDY_DATA_DIR: &str = "study_data";

/// Directory name, under the data directory, for study metadata documents.
pub const METADATA_DIR_NAME: &str = "metadata";

/// Default leading segment of every generated storage path.
pub const DEFAULT_BLOB_PREFIX: &str = "dicom_files";

/// Replacement for each whitespace character of a study name inside a storage path.
pub const NAME_SEPARATOR: char = '_';

/// Media type that marks an upload as DICOM regardless of its file name.
pub const DICOM_MEDIA_TYPE: &str = "application/dicom";

/// File extension (compared case-insensitively) that marks an upload as DICOM.
pub const DICOM_EXTENSION: &str = "dcm";

/// Default per-call timeout for backend operations, in seconds.
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// Default number of extra attempts for the listing query.
pub const DEFAULT_QUERY_RETRIES: u32 = 2;

/// Default age an unreferenced blob must reach before reconciliation treats it as orphaned.
pub const DEFAULT_ORPHAN_GRACE_SECS: u64 = 60 * 60;

/// Default largest DICOM file accepted over the network, in bytes.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;
