//! Storage path derivation.
//!
//! Paths have the shape `<prefix>/<name>-<epoch-millis>/<file name>`, with every whitespace
//! character of the name replaced by `_`. Nothing else in the name is rewritten. Two
//! derivations for the same name within the same millisecond collide; the blob store's
//! non-overwriting upload turns that collision into a write error rather than data loss.

use crate::constants::NAME_SEPARATOR;
use catalog_types::StoragePath;
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNamer {
    prefix: String,
}

impl PathNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Derives the storage path for `original_file_name` uploaded under `name` at `now`.
    pub fn derive(&self, name: &str, original_file_name: &str, now: DateTime<Utc>) -> String {
        format!(
            "{}/{}-{}/{}",
            self.prefix,
            sanitize_name(name),
            now.timestamp_millis(),
            original_file_name
        )
    }

    /// Recovers the derivation time from a path this namer produced.
    ///
    /// Returns `None` for paths outside the prefix or not in the derived shape.
    pub fn derived_at(&self, path: &StoragePath) -> Option<DateTime<Utc>> {
        let rest = path.as_str().strip_prefix(&self.prefix)?.strip_prefix('/')?;
        let (folder, file_name) = rest.split_once('/')?;
        if file_name.is_empty() || file_name.contains('/') {
            return None;
        }
        let (_, millis) = folder.rsplit_once('-')?;
        if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Utc.timestamp_millis_opt(millis.parse().ok()?).single()
    }
}

/// Replaces each whitespace character with the separator.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() { NAME_SEPARATOR } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_millis(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).single().unwrap()
    }

    #[test]
    fn derives_traceable_path() {
        let namer = PathNamer::new("dicom_files");
        let path = namer.derive("Jane Doe", "scan.dcm", at_millis(1_718_000_000_123));
        assert_eq!(path, "dicom_files/Jane_Doe-1718000000123/scan.dcm");
    }

    #[test]
    fn each_whitespace_character_is_replaced() {
        assert_eq!(sanitize_name("Jane  Q\tDoe"), "Jane__Q_Doe");
        assert_eq!(sanitize_name("O'Brien/Smith"), "O'Brien/Smith");
    }

    #[test]
    fn different_millis_give_different_paths() {
        let namer = PathNamer::new("dicom_files/");
        let a = namer.derive("Jane Doe", "scan.dcm", at_millis(1));
        let b = namer.derive("Jane Doe", "scan.dcm", at_millis(2));
        assert_ne!(a, b);
        assert!(a.starts_with("dicom_files/Jane_Doe-"));
    }

    #[test]
    fn derived_at_inverts_derive() {
        let namer = PathNamer::new("dicom_files");
        let now = at_millis(1_718_000_000_123);
        let path = StoragePath::new(namer.derive("Jane-Doe", "scan.dcm", now)).unwrap();
        assert_eq!(namer.derived_at(&path), Some(now));
    }

    #[test]
    fn derived_at_rejects_foreign_paths() {
        let namer = PathNamer::new("dicom_files");
        for raw in [
            "other/Jane-1/scan.dcm",
            "dicom_files/Jane/scan.dcm",
            "dicom_files/Jane-12x/scan.dcm",
            "dicom_files/Jane-1/nested/scan.dcm",
            "dicom_files/scan.dcm",
        ] {
            let path = StoragePath::new(raw).unwrap();
            assert_eq!(namer.derived_at(&path), None, "{raw}");
        }
    }
}
