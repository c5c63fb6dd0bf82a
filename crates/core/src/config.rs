//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services as an
//! `Arc<CoreConfig>`. Request handling never reads process-wide environment variables, which
//! keeps behaviour consistent across threads and test harnesses.

use crate::constants::{
    DEFAULT_BLOB_PREFIX, DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_MAX_UPLOAD_BYTES,
    DEFAULT_ORPHAN_GRACE_SECS, DEFAULT_QUERY_RETRIES, DEFAULT_STUDY_DATA_DIR, METADATA_DIR_NAME,
};
use crate::{StudyError, StudyResult};
use catalog_files::BLOBS_FOLDER_NAME;
use catalog_types::StoragePath;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    blob_prefix: String,
    public_base_url: Option<String>,
    call_timeout: Option<Duration>,
    query_retries: u32,
    orphan_grace: Duration,
    max_upload_bytes: u64,
}

impl CoreConfig {
    /// Create a `CoreConfig` with defaults for everything but the data directory.
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            blob_prefix: DEFAULT_BLOB_PREFIX.to_string(),
            public_base_url: None,
            call_timeout: Some(Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS)),
            query_retries: DEFAULT_QUERY_RETRIES,
            orphan_grace: Duration::from_secs(DEFAULT_ORPHAN_GRACE_SECS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    /// Resolve configuration from the process environment.
    ///
    /// Call this once, at startup. Recognised variables: `STUDY_DATA_DIR`,
    /// `STUDY_BLOB_PREFIX`, `STUDY_PUBLIC_BASE_URL`, `STUDY_CALL_TIMEOUT_SECS`,
    /// `STUDY_QUERY_RETRIES`, `STUDY_ORPHAN_GRACE_SECS` and `STUDY_MAX_UPLOAD_BYTES`.
    pub fn from_env() -> StudyResult<Self> {
        let var = |name: &str| std::env::var(name).ok();

        let data_dir = var("STUDY_DATA_DIR")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_STUDY_DATA_DIR.into());

        let mut cfg = Self::new(PathBuf::from(data_dir));
        if let Some(prefix) = var("STUDY_BLOB_PREFIX").filter(|v| !v.trim().is_empty()) {
            cfg = cfg.with_blob_prefix(prefix)?;
        }
        cfg.public_base_url = var("STUDY_PUBLIC_BASE_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        cfg.call_timeout = call_timeout_from_env_value(var("STUDY_CALL_TIMEOUT_SECS"))?;
        cfg.query_retries = query_retries_from_env_value(var("STUDY_QUERY_RETRIES"))?;
        cfg.orphan_grace = orphan_grace_from_env_value(var("STUDY_ORPHAN_GRACE_SECS"))?;
        cfg.max_upload_bytes = max_upload_bytes_from_env_value(var("STUDY_MAX_UPLOAD_BYTES"))?;
        Ok(cfg)
    }

    /// Set the leading path segment(s) for generated storage paths.
    ///
    /// The prefix must itself be a safe relative storage path.
    pub fn with_blob_prefix(mut self, prefix: impl Into<String>) -> StudyResult<Self> {
        let prefix = prefix.into();
        let trimmed = prefix.trim().trim_end_matches('/');
        StoragePath::new(trimmed).map_err(|e| {
            StudyError::Configuration(format!("blob prefix {prefix:?} is not usable: {e}"))
        })?;
        self.blob_prefix = trimmed.to_string();
        Ok(self)
    }

    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = Some(url.into());
        self
    }

    /// `None` disables per-call timeouts.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_query_retries(mut self, retries: u32) -> Self {
        self.query_retries = retries;
        self
    }

    pub fn with_orphan_grace(mut self, grace: Duration) -> Self {
        self.orphan_grace = grace;
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join(BLOBS_FOLDER_NAME)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.data_dir.join(METADATA_DIR_NAME)
    }

    pub fn blob_prefix(&self) -> &str {
        &self.blob_prefix
    }

    pub fn public_base_url(&self) -> Option<&str> {
        self.public_base_url.as_deref()
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    pub fn query_retries(&self) -> u32 {
        self.query_retries
    }

    pub fn orphan_grace(&self) -> Duration {
        self.orphan_grace
    }

    /// Largest decoded DICOM file an outer surface should accept.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }
}

fn parse_u64(name: &str, value: Option<String>) -> StudyResult<Option<u64>> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    value
        .map(|v| {
            v.parse::<u64>().map_err(|_| {
                StudyError::Configuration(format!("{name} must be a whole number, got {v:?}"))
            })
        })
        .transpose()
}

/// Parse the per-call timeout from an optional seconds value.
///
/// Unset or blank yields the default; `0` disables timeouts.
pub fn call_timeout_from_env_value(value: Option<String>) -> StudyResult<Option<Duration>> {
    match parse_u64("STUDY_CALL_TIMEOUT_SECS", value)? {
        None => Ok(Some(Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS))),
        Some(0) => Ok(None),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
    }
}

/// Parse the number of extra listing-query attempts.
pub fn query_retries_from_env_value(value: Option<String>) -> StudyResult<u32> {
    let retries = parse_u64("STUDY_QUERY_RETRIES", value)?;
    match retries {
        None => Ok(DEFAULT_QUERY_RETRIES),
        Some(n) => u32::try_from(n).map_err(|_| {
            StudyError::Configuration(format!("STUDY_QUERY_RETRIES is too large: {n}"))
        }),
    }
}

/// Parse the reconciliation grace period from an optional seconds value.
pub fn orphan_grace_from_env_value(value: Option<String>) -> StudyResult<Duration> {
    Ok(Duration::from_secs(
        parse_u64("STUDY_ORPHAN_GRACE_SECS", value)?.unwrap_or(DEFAULT_ORPHAN_GRACE_SECS),
    ))
}

/// Parse the upload size cap. Unset, blank or `0` yields the default.
pub fn max_upload_bytes_from_env_value(value: Option<String>) -> StudyResult<u64> {
    match parse_u64("STUDY_MAX_UPLOAD_BYTES", value)? {
        None | Some(0) => Ok(DEFAULT_MAX_UPLOAD_BYTES),
        Some(bytes) => Ok(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = CoreConfig::new(PathBuf::from("/tmp/studies"));
        assert_eq!(cfg.blob_prefix(), "dicom_files");
        assert_eq!(cfg.blobs_dir(), PathBuf::from("/tmp/studies/blobs"));
        assert_eq!(cfg.metadata_dir(), PathBuf::from("/tmp/studies/metadata"));
        assert_eq!(cfg.call_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.query_retries(), 2);
        assert!(cfg.public_base_url().is_none());
        assert_eq!(cfg.max_upload_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    fn max_upload_bytes_parsing() {
        assert_eq!(
            max_upload_bytes_from_env_value(None).unwrap(),
            DEFAULT_MAX_UPLOAD_BYTES
        );
        assert_eq!(
            max_upload_bytes_from_env_value(Some("0".into())).unwrap(),
            DEFAULT_MAX_UPLOAD_BYTES
        );
        assert_eq!(
            max_upload_bytes_from_env_value(Some(" 8388608 ".into())).unwrap(),
            8 * 1024 * 1024
        );
        assert!(matches!(
            max_upload_bytes_from_env_value(Some("8MB".into())),
            Err(StudyError::Configuration(_))
        ));
    }

    #[test]
    fn call_timeout_parsing() {
        assert_eq!(
            call_timeout_from_env_value(None).unwrap(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            call_timeout_from_env_value(Some("  ".into())).unwrap(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(call_timeout_from_env_value(Some("0".into())).unwrap(), None);
        assert_eq!(
            call_timeout_from_env_value(Some("5".into())).unwrap(),
            Some(Duration::from_secs(5))
        );
        assert!(matches!(
            call_timeout_from_env_value(Some("soon".into())),
            Err(StudyError::Configuration(_))
        ));
    }

    #[test]
    fn query_retries_parsing() {
        assert_eq!(query_retries_from_env_value(None).unwrap(), 2);
        assert_eq!(query_retries_from_env_value(Some("0".into())).unwrap(), 0);
        assert!(query_retries_from_env_value(Some("-1".into())).is_err());
    }

    #[test]
    fn blob_prefix_must_be_safe() {
        let cfg = CoreConfig::new(PathBuf::from("d"))
            .with_blob_prefix("studies/dicom/")
            .unwrap();
        assert_eq!(cfg.blob_prefix(), "studies/dicom");

        assert!(CoreConfig::new(PathBuf::from("d"))
            .with_blob_prefix("../outside")
            .is_err());
        assert!(CoreConfig::new(PathBuf::from("d"))
            .with_blob_prefix("/abs")
            .is_err());
    }
}
