//! Filesystem blob storage service implementation
//!
//! This module provides the [`FilesService`] type, the local blob store behind the study
//! catalog. It is addressed purely by [`StoragePath`] keys; the catalog's metadata store holds
//! the only references to those keys.
//!
//! # Storage Layout
//!
//! A key such as `dicom_files/Jane_Doe-1718000000000/scan.dcm` is stored at
//! `<root>/dicom_files/Jane_Doe-1718000000000/scan.dcm`. Intermediate directories are created
//! on write and pruned again on remove once empty.
//!
//! # Write Semantics
//!
//! - [`WriteMode::CreateNew`] uses an exclusive create, so two writers racing on the same key
//!   cannot both succeed and an existing blob is never clobbered.
//! - [`WriteMode::Overwrite`] writes a hidden sibling file first and renames it into place.
//! - A write that fails part-way removes whatever it left behind.
//!
//! # Security Model
//!
//! - The root is canonicalised once at construction
//! - Keys are validated by [`StoragePath`], which rejects absolute paths and `..` segments
//! - Listing skips anything that is not a regular file or whose name is not a valid key

use crate::FilesError;
use catalog_types::StoragePath;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Prefix used for in-flight overwrite files; listing ignores names starting with it.
const PARTIAL_PREFIX: &str = ".partial-";

/// How a write treats an existing blob at the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with [`FilesError::BlobAlreadyExists`] if the key is taken.
    CreateNew,
    /// Replace any existing blob.
    Overwrite,
}

/// Receipt for a stored blob.
///
/// Carries the digest and best-effort media type of the bytes that were written. None of it is
/// authoritative for the catalog; it exists for logging and auditing.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct StoredBlob {
    /// Key the blob was stored under
    pub path: StoragePath,

    /// Size of the blob in bytes
    pub size_bytes: u64,

    /// Hexadecimal SHA-256 digest of the blob content
    pub sha256: String,

    /// Media type sniffed from the content, if recognised
    pub media_type: Option<String>,

    /// UTC timestamp when the blob was written
    pub stored_at: DateTime<Utc>,
}

/// Service for blob storage rooted at one directory.
///
/// The service is cheap to share behind an `Arc`; it holds no open handles.
#[derive(Debug)]
pub struct FilesService {
    /// Canonical root directory holding all blobs
    root_directory: PathBuf,

    /// Base URL under which blobs are publicly served, if any
    public_base_url: Option<String>,
}

impl FilesService {
    /// Opens (creating if needed) a blob store rooted at `root_directory`.
    ///
    /// # Arguments
    ///
    /// * `root_directory` - Directory that will hold the blobs
    /// * `public_base_url` - Base URL for [`Self::public_url`]; `None` yields `file://` URLs
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidRootDirectory`] if the directory cannot be created, is not
    /// a directory, or cannot be canonicalised.
    pub fn open(
        root_directory: &Path,
        public_base_url: Option<String>,
    ) -> Result<Self, FilesError> {
        if root_directory.exists() && !root_directory.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root_directory.display()
            )));
        }

        fs::create_dir_all(root_directory).map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot create {}: {}",
                root_directory.display(),
                e
            ))
        })?;

        let root_directory = root_directory.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root_directory.display(),
                e
            ))
        })?;

        let public_base_url = public_base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        Ok(Self {
            root_directory,
            public_base_url,
        })
    }

    /// Writes `content` under `path`.
    ///
    /// # Errors
    ///
    /// Returns `FilesError` if:
    /// - `mode` is [`WriteMode::CreateNew`] and a blob already exists at `path`
    /// - Directory creation, the write itself, or the final rename fails (I/O)
    pub fn write(
        &self,
        path: &StoragePath,
        content: &[u8],
        mode: WriteMode,
    ) -> Result<StoredBlob, FilesError> {
        let target = self.absolute_path(path);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                FilesError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create directory {}: {}", parent.display(), e),
                ))
            })?;
        }

        match mode {
            WriteMode::CreateNew => self.write_exclusive(path, &target, content)?,
            WriteMode::Overwrite => Self::write_replacing(&target, content)?,
        }

        let digest: [u8; 32] = Sha256::digest(content).into();
        let stored = StoredBlob {
            path: path.clone(),
            size_bytes: content.len() as u64,
            sha256: hex::encode(digest),
            media_type: infer::get(content).map(|kind| kind.mime_type().to_string()),
            stored_at: Utc::now(),
        };
        tracing::debug!(
            storage_path = %stored.path,
            size_bytes = stored.size_bytes,
            sha256 = %stored.sha256,
            media_type = ?stored.media_type,
            "blob written"
        );
        Ok(stored)
    }

    fn write_exclusive(
        &self,
        path: &StoragePath,
        target: &Path,
        content: &[u8],
    ) -> Result<(), FilesError> {
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(target)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(FilesError::BlobAlreadyExists(path.to_string()));
            }
            Err(e) => {
                return Err(FilesError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {}: {}", target.display(), e),
                )));
            }
        };

        if let Err(e) = file.write_all(content).and_then(|()| file.sync_all()) {
            drop(file);
            // The key must not be left pointing at a truncated blob.
            let _ = fs::remove_file(target);
            return Err(FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write {}: {}", target.display(), e),
            )));
        }

        Ok(())
    }

    fn write_replacing(target: &Path, content: &[u8]) -> Result<(), FilesError> {
        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("blob");
        let staging = target.with_file_name(format!("{PARTIAL_PREFIX}{file_name}"));

        let result = fs::write(&staging, content).and_then(|()| fs::rename(&staging, target));
        if let Err(e) = result {
            let _ = fs::remove_file(&staging);
            return Err(FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to replace {}: {}", target.display(), e),
            )));
        }
        Ok(())
    }

    /// Reads the blob stored under `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::BlobNotFound`] if nothing is stored at `path`, or
    /// [`FilesError::Io`] if the blob cannot be read.
    pub fn read(&self, path: &StoragePath) -> Result<Vec<u8>, FilesError> {
        let target = self.absolute_path(path);
        match fs::read(&target) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(FilesError::BlobNotFound(path.to_string()))
            }
            Err(e) => Err(FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read blob from {}: {}", target.display(), e),
            ))),
        }
    }

    /// Removes the blob stored under `path`, then prunes directories it leaves empty.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::BlobNotFound`] if nothing is stored at `path`. Removing a missing
    /// blob is an error so that callers never mistake "already gone" for "just deleted".
    pub fn remove(&self, path: &StoragePath) -> Result<(), FilesError> {
        let target = self.absolute_path(path);
        if !target.is_file() {
            return Err(FilesError::BlobNotFound(path.to_string()));
        }

        fs::remove_file(&target).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                FilesError::BlobNotFound(path.to_string())
            } else {
                FilesError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to remove {}: {}", target.display(), e),
                ))
            }
        })?;

        self.prune_empty_parents(&target);
        Ok(())
    }

    fn prune_empty_parents(&self, removed: &Path) {
        let mut current = removed.parent();
        while let Some(dir) = current {
            if dir == self.root_directory || !dir.starts_with(&self.root_directory) {
                break;
            }
            // remove_dir refuses non-empty directories, which ends the walk.
            if fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    /// Returns `true` if a blob is stored under `path`.
    pub fn exists(&self, path: &StoragePath) -> bool {
        self.absolute_path(path).is_file()
    }

    /// Lists every blob key under `prefix`, sorted.
    ///
    /// An empty prefix lists the whole store. A prefix that does not exist yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidPrefix`] for an unsafe prefix, or [`FilesError::Io`] if a
    /// directory cannot be read.
    pub fn list(&self, prefix: &str) -> Result<Vec<StoragePath>, FilesError> {
        let prefix = prefix.trim_end_matches('/');
        let start = if prefix.is_empty() {
            self.root_directory.clone()
        } else {
            let prefix_path = StoragePath::new(prefix)
                .map_err(|_| FilesError::InvalidPrefix(prefix.to_string()))?;
            self.absolute_path(&prefix_path)
        };

        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut stack = vec![start];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                let entry_path = entry.path();

                if file_type.is_dir() {
                    stack.push(entry_path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                if entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with(PARTIAL_PREFIX))
                {
                    continue;
                }
                if let Some(key) = self.key_for(&entry_path) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// Returns the public URL for `path`.
    ///
    /// The URL is derived, not checked: it assumes the blob exists.
    #[must_use]
    pub fn public_url(&self, path: &StoragePath) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}/{path}"),
            None => format!("file://{}", self.absolute_path(path).display()),
        }
    }

    /// Returns the canonical root directory.
    #[must_use]
    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    fn absolute_path(&self, path: &StoragePath) -> PathBuf {
        path.segments()
            .fold(self.root_directory.clone(), |acc, segment| acc.join(segment))
    }

    fn key_for(&self, absolute: &Path) -> Option<StoragePath> {
        let relative = absolute.strip_prefix(&self.root_directory).ok()?;
        let segments: Option<Vec<&str>> = relative.iter().map(|s| s.to_str()).collect();
        StoragePath::new(segments?.join("/")).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(raw: &str) -> StoragePath {
        StoragePath::new(raw).unwrap()
    }

    fn open_service(temp: &TempDir) -> FilesService {
        FilesService::open(&temp.path().join("blobs"), None).unwrap()
    }

    #[test]
    fn test_open_creates_root() {
        let temp = TempDir::new().unwrap();
        let service = open_service(&temp);
        assert!(service.root_directory().is_dir());
        assert!(service.root_directory().ends_with("blobs"));
    }

    #[test]
    fn test_open_rejects_file_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("file.txt");
        fs::write(&root, "not a directory").unwrap();

        let result = FilesService::open(&root, None);
        assert!(matches!(result, Err(FilesError::InvalidRootDirectory(_))));
    }

    #[test]
    fn test_write_and_read_back() {
        let temp = TempDir::new().unwrap();
        let service = open_service(&temp);
        let path = key("dicom_files/Jane_Doe-1/scan.dcm");

        let stored = service
            .write(&path, b"Hello, World!", WriteMode::CreateNew)
            .unwrap();

        assert_eq!(stored.size_bytes, 13);
        assert_eq!(stored.sha256.len(), 64);
        assert_eq!(service.read(&path).unwrap(), b"Hello, World!");
        assert!(service.exists(&path));
    }

    #[test]
    fn test_create_new_refuses_existing_blob() {
        let temp = TempDir::new().unwrap();
        let service = open_service(&temp);
        let path = key("dicom_files/a/scan.dcm");

        service.write(&path, b"first", WriteMode::CreateNew).unwrap();
        let second = service.write(&path, b"second", WriteMode::CreateNew);

        assert!(matches!(second, Err(FilesError::BlobAlreadyExists(_))));
        assert_eq!(service.read(&path).unwrap(), b"first");
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let temp = TempDir::new().unwrap();
        let service = open_service(&temp);
        let path = key("dicom_files/a/scan.dcm");

        service.write(&path, b"first", WriteMode::CreateNew).unwrap();
        service.write(&path, b"second", WriteMode::Overwrite).unwrap();

        assert_eq!(service.read(&path).unwrap(), b"second");
        assert_eq!(service.list("").unwrap(), vec![path]);
    }

    #[test]
    fn test_write_sniffs_media_type() {
        let temp = TempDir::new().unwrap();
        let service = open_service(&temp);
        let png_header = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

        let stored = service
            .write(&key("images/x.png"), &png_header, WriteMode::CreateNew)
            .unwrap();

        assert_eq!(stored.media_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_remove_prunes_empty_directories() {
        let temp = TempDir::new().unwrap();
        let service = open_service(&temp);
        let path = key("dicom_files/Jane_Doe-1/scan.dcm");
        let sibling = key("dicom_files/John-2/scan.dcm");

        service.write(&path, b"a", WriteMode::CreateNew).unwrap();
        service.write(&sibling, b"b", WriteMode::CreateNew).unwrap();
        service.remove(&path).unwrap();

        assert!(!service.exists(&path));
        assert!(!service.root_directory().join("dicom_files/Jane_Doe-1").exists());
        assert!(service.root_directory().join("dicom_files").is_dir());
        assert!(service.root_directory().is_dir());
    }

    #[test]
    fn test_remove_missing_blob_is_an_error() {
        let temp = TempDir::new().unwrap();
        let service = open_service(&temp);

        let result = service.remove(&key("dicom_files/none/scan.dcm"));
        assert!(matches!(result, Err(FilesError::BlobNotFound(_))));
    }

    #[test]
    fn test_read_missing_blob() {
        let temp = TempDir::new().unwrap();
        let service = open_service(&temp);

        let result = service.read(&key("nothing/here.dcm"));
        assert!(matches!(result, Err(FilesError::BlobNotFound(_))));
    }

    #[test]
    fn test_list_by_prefix() {
        let temp = TempDir::new().unwrap();
        let service = open_service(&temp);
        for raw in ["dicom_files/b/2.dcm", "dicom_files/a/1.dcm", "other/3.dcm"] {
            service.write(&key(raw), b"x", WriteMode::CreateNew).unwrap();
        }

        let listed = service.list("dicom_files/").unwrap();
        assert_eq!(
            listed,
            vec![key("dicom_files/a/1.dcm"), key("dicom_files/b/2.dcm")]
        );
        assert_eq!(service.list("").unwrap().len(), 3);
        assert!(service.list("missing").unwrap().is_empty());
        assert!(matches!(
            service.list("../escape"),
            Err(FilesError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn test_public_url_with_and_without_base() {
        let temp = TempDir::new().unwrap();
        let path = key("dicom_files/a/scan.dcm");

        let served = FilesService::open(
            &temp.path().join("served"),
            Some("https://cdn.example.org/studies/".into()),
        )
        .unwrap();
        assert_eq!(
            served.public_url(&path),
            "https://cdn.example.org/studies/dicom_files/a/scan.dcm"
        );

        let local = open_service(&temp);
        let url = local.public_url(&path);
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("dicom_files/a/scan.dcm"));
    }

    #[test]
    fn test_stored_blob_serialization() {
        let stored = StoredBlob {
            path: key("dicom_files/a/scan.dcm"),
            size_bytes: 1024,
            sha256: "abc123".into(),
            media_type: None,
            stored_at: "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap(),
        };

        let json = serde_json::to_string(&stored).unwrap();
        assert!(json.contains("dicom_files/a/scan.dcm"));
        assert!(json.contains("abc123"));
    }
}
