use std::time::Duration;

/// Failure reported by a blob or metadata backend.
///
/// Backends only say *what* went wrong; the lifecycle coordinator decides which
/// [`StudyError`] that becomes for the operation in progress.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("rejected by backend: {0}")]
    Rejected(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Typed failures of the study catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum StudyError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("failed to store DICOM file: {0}")]
    StorageWrite(BackendError),
    #[error("failed to remove DICOM file: {0}")]
    StorageDelete(BackendError),
    #[error("failed to write study record: {0}")]
    MetadataWrite(BackendError),
    #[error("failed to delete study record: {0}")]
    MetadataDelete(BackendError),
    #[error("failed to query studies: {0}")]
    Query(BackendError),
    #[error("study not found: {0}")]
    NotFound(String),
    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl StudyError {
    pub fn kind(&self) -> StudyErrorKind {
        match self {
            StudyError::Validation(_) => StudyErrorKind::Validation,
            StudyError::StorageWrite(_) => StudyErrorKind::StorageWrite,
            StudyError::StorageDelete(_) => StudyErrorKind::StorageDelete,
            StudyError::MetadataWrite(_) => StudyErrorKind::MetadataWrite,
            StudyError::MetadataDelete(_) => StudyErrorKind::MetadataDelete,
            StudyError::Query(_) => StudyErrorKind::Query,
            StudyError::NotFound(_) => StudyErrorKind::NotFound,
            StudyError::Timeout { .. } => StudyErrorKind::Timeout,
            StudyError::Configuration(_) => StudyErrorKind::Configuration,
        }
    }
}

impl From<catalog_types::TextError> for StudyError {
    fn from(err: catalog_types::TextError) -> Self {
        StudyError::Validation(err.to_string())
    }
}

/// Stable, field-free discriminant of [`StudyError`], for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StudyErrorKind {
    Validation,
    StorageWrite,
    StorageDelete,
    MetadataWrite,
    MetadataDelete,
    Query,
    NotFound,
    Timeout,
    Configuration,
}

impl StudyErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            StudyErrorKind::Validation => "validation_error",
            StudyErrorKind::StorageWrite => "storage_write_error",
            StudyErrorKind::StorageDelete => "storage_delete_error",
            StudyErrorKind::MetadataWrite => "metadata_write_error",
            StudyErrorKind::MetadataDelete => "metadata_delete_error",
            StudyErrorKind::Query => "query_error",
            StudyErrorKind::NotFound => "not_found",
            StudyErrorKind::Timeout => "timeout",
            StudyErrorKind::Configuration => "configuration_error",
        }
    }

    /// Whether retrying the same request later could succeed without changing it.
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            StudyErrorKind::StorageWrite
                | StudyErrorKind::StorageDelete
                | StudyErrorKind::MetadataWrite
                | StudyErrorKind::MetadataDelete
                | StudyErrorKind::Query
                | StudyErrorKind::Timeout
        )
    }
}

impl std::fmt::Display for StudyErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type StudyResult<T> = std::result::Result<T, StudyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_are_stable() {
        let err = StudyError::StorageDelete(BackendError::NotFound("a/b.dcm".into()));
        assert_eq!(err.kind(), StudyErrorKind::StorageDelete);
        assert_eq!(err.kind().as_str(), "storage_delete_error");
        assert_eq!(
            err.to_string(),
            "failed to remove DICOM file: not found: a/b.dcm"
        );
    }

    #[test]
    fn timeout_message_reports_duration() {
        let err = StudyError::Timeout {
            operation: "blob upload",
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "blob upload timed out after 1500ms");
        assert!(err.kind().is_retryable());
    }

    #[test]
    fn text_errors_become_validation() {
        let err: StudyError = catalog_types::TextError::Empty.into();
        assert_eq!(err.kind(), StudyErrorKind::Validation);
        assert!(!err.kind().is_retryable());
    }
}
