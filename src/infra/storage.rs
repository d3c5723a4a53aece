//! Filesystem storage for generated artifacts.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use slug::slugify;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("artifact payload is empty")]
    EmptyPayload,
}

/// Location and fingerprint of one stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub stored_path: String,
    pub url: String,
    pub checksum: String,
    pub size_bytes: u64,
}

/// Artifacts are written under `root` and served back under `public_prefix`.
#[derive(Debug)]
pub struct ArtifactStorage {
    root: PathBuf,
    public_prefix: String,
}

impl ArtifactStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf, public_prefix: impl Into<String>) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        let public_prefix = public_prefix.into().trim_end_matches('/').to_string();
        Ok(Self {
            root,
            public_prefix,
        })
    }

    /// URL path prefix artifacts are served under, without a trailing slash.
    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    /// Write `data` under a fresh unique path derived from `name`.
    pub async fn store(&self, name: &str, data: Bytes) -> Result<StoredArtifact, StorageError> {
        if data.is_empty() {
            return Err(StorageError::EmptyPayload);
        }

        let stored_path = build_stored_path(name);
        let absolute = self.resolve(&stored_path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&absolute).await?;
        if let Err(err) = file.write_all(&data).await {
            drop(file);
            let _ = fs::remove_file(&absolute).await;
            return Err(StorageError::Io(err));
        }
        file.flush().await?;

        Ok(self.describe(stored_path, &data))
    }

    /// Move a file produced elsewhere (e.g. a recorded video) into storage.
    pub async fn store_file(
        &self,
        name: &str,
        source: &Path,
    ) -> Result<StoredArtifact, StorageError> {
        let data = Bytes::from(fs::read(source).await?);
        let stored = self.store(name, data).await?;
        if let Err(err) = fs::remove_file(source).await {
            tracing::debug!(
                target = "courseviz::storage",
                path = %source.display(),
                error = %err,
                "failed to remove moved artifact source"
            );
        }
        Ok(stored)
    }

    /// Attempt to read the stored payload into memory.
    pub async fn read(&self, stored_path: &str) -> Result<Bytes, StorageError> {
        let absolute = self.resolve(stored_path)?;
        let data = fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    fn describe(&self, stored_path: String, data: &[u8]) -> StoredArtifact {
        let checksum = hex::encode(Sha256::digest(data));
        StoredArtifact {
            url: format!("{}/{}", self.public_prefix, stored_path),
            stored_path,
            checksum,
            size_bytes: data.len() as u64,
        }
    }

    fn resolve(&self, stored_path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(stored_path);
        if stored_path.is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(StorageError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }
}

fn build_stored_path(name: &str) -> String {
    let (year, month, day) = time::OffsetDateTime::now_utc().to_calendar_date();
    let directory = format!("{year}/{:02}/{:02}", month as u8, day);
    let identifier = Uuid::new_v4();
    let filename = sanitize_filename(name);
    format!("{directory}/{identifier}-{filename}")
}

fn sanitize_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("artifact");
    let mut base = slugify(stem);
    if base.is_empty() {
        base = "artifact".to_string();
    }

    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.trim_matches('.').to_ascii_lowercase())
        .filter(|value| !value.is_empty());

    match extension {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}
