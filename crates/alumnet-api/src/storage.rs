//! Object store for profile photos and post attachments, kept on local disk.

use std::path::PathBuf;

use bytes::Bytes;
use futures_util::Stream;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

/// Write granularity; one progress item per chunk.
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object path '{0}'")]
    InvalidPath(String),

    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("object is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Set on the final item only, once the object is in place.
    pub sha256: Option<String>,
}

impl UploadProgress {
    pub fn is_complete(&self) -> bool {
        self.sha256.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
    public_url: String,
    max_size: usize,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_url: &str, max_size: usize) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.trim_end_matches('/').to_string(),
            max_size,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Writes `bytes` at `path`, reporting progress per chunk.
    ///
    /// The object only appears at `path` once fully written; a reader never
    /// sees a partial upload.
    pub fn upload(
        &self,
        path: &str,
        bytes: Bytes,
    ) -> Result<impl Stream<Item = Result<UploadProgress, StorageError>> + use<>, StorageError> {
        let path = normalize_path(path)?;
        if bytes.len() > self.max_size {
            return Err(StorageError::TooLarge {
                size: bytes.len(),
                limit: self.max_size,
            });
        }

        let target = self.root.join(&path);
        // Each upload writes its own temp file, even when racing on one path
        let partial = PathBuf::from(format!(
            "{}.{}.part",
            target.display(),
            Uuid::new_v4().simple()
        ));
        let total_bytes = bytes.len() as u64;

        Ok(async_stream::try_stream! {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let mut guard = PartialFile::new(partial.clone());
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut hasher = Sha256::new();
            let mut written = 0u64;

            for chunk in bytes.chunks(CHUNK_SIZE) {
                file.write_all(chunk).await?;
                hasher.update(chunk);
                written += chunk.len() as u64;
                yield UploadProgress {
                    bytes_transferred: written,
                    total_bytes,
                    sha256: None,
                };
            }

            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&partial, &target).await?;
            guard.keep();

            yield UploadProgress {
                bytes_transferred: written,
                total_bytes,
                sha256: Some(hex::encode(hasher.finalize())),
            };
        })
    }

    /// Public URL an uploaded object is served from.
    pub fn download_url(&self, path: &str) -> Result<String, StorageError> {
        let path = normalize_path(path)?;
        Ok(format!("{}/files/{}", self.public_url, path))
    }

    pub async fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let path = normalize_path(path)?;
        match tokio::fs::read(self.root.join(&path)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(path)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Removes an unfinished upload's temp file unless the upload completed.
/// Covers write errors and streams dropped part way.
struct PartialFile {
    path: PathBuf,
    kept: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, kept: false }
    }

    fn keep(&mut self) {
        self.kept = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", self.path.display(), e),
        }
    }
}

/// Validates an object path and strips surrounding slashes. Segments may
/// only use ASCII letters, digits, `-`, `_` and `.`, and may not be `.`/`..`.
pub fn normalize_path(path: &str) -> Result<String, StorageError> {
    let trimmed = path.trim_matches('/');
    let valid = !trimmed.is_empty()
        && trimmed.split('/').all(|segment| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && !segment.ends_with(".part")
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        });

    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(StorageError::InvalidPath(path.to_string()))
    }
}

/// Content type guessed from the file extension.
pub fn content_type(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "ogg" => "video/ogg",
        _ => "application/octet-stream",
    }
}
