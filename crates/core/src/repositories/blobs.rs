//! [`BlobStore`] over the filesystem blob service.

use crate::error::{BackendError, BackendResult};
use crate::stores::{BlobStore, UploadOptions};
use catalog_files::{FilesError, FilesService, WriteMode};
use catalog_types::StoragePath;

impl From<FilesError> for BackendError {
    fn from(err: FilesError) -> Self {
        match err {
            FilesError::BlobAlreadyExists(path) => BackendError::AlreadyExists(path),
            FilesError::BlobNotFound(path) => BackendError::NotFound(path),
            FilesError::InvalidPrefix(prefix) => BackendError::Rejected(prefix),
            FilesError::InvalidRootDirectory(msg) => BackendError::Unavailable(msg),
            FilesError::Io(e) => BackendError::Unavailable(e.to_string()),
        }
    }
}

impl BlobStore for FilesService {
    fn upload(
        &self,
        path: &StoragePath,
        content: &[u8],
        options: UploadOptions,
    ) -> BackendResult<()> {
        let mode = if options.overwrite {
            WriteMode::Overwrite
        } else {
            WriteMode::CreateNew
        };
        self.write(path, content, mode)?;
        Ok(())
    }

    fn remove(&self, path: &StoragePath) -> BackendResult<()> {
        Ok(FilesService::remove(self, path)?)
    }

    fn read(&self, path: &StoragePath) -> BackendResult<Vec<u8>> {
        Ok(FilesService::read(self, path)?)
    }

    fn exists(&self, path: &StoragePath) -> BackendResult<bool> {
        Ok(FilesService::exists(self, path))
    }

    fn list(&self, prefix: &str) -> BackendResult<Vec<StoragePath>> {
        Ok(FilesService::list(self, prefix)?)
    }

    fn public_url(&self, path: &StoragePath) -> String {
        FilesService::public_url(self, path)
    }
}
