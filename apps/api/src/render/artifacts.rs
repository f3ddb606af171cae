//! Artifact storage. The job store only keeps the file name; bytes live here.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use thiserror::Error;
use tracing::info;

use crate::render::job::PDF_CONTENT_TYPE;

const S3_PREFIX: &str = "renders";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact {0} not found")]
    NotFound(String),

    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, file_name: &str, bytes: Bytes) -> Result<(), ArtifactError>;

    async fn fetch(&self, file_name: &str) -> Result<Bytes, ArtifactError>;

    /// Deleting a missing artifact is not an error.
    async fn delete(&self, file_name: &str) -> Result<(), ArtifactError>;
}

/// Artifact names are generated by us, but they also arrive in URLs.
/// Only a single plain path segment is accepted.
fn check_name(file_name: &str) -> Result<(), ArtifactError> {
    let ok = !file_name.is_empty()
        && file_name != "."
        && file_name != ".."
        && !file_name.contains(['/', '\\', '\0']);
    if ok {
        Ok(())
    } else {
        Err(ArtifactError::InvalidName(file_name.to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Local filesystem
// ────────────────────────────────────────────────────────────────────────────

pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, file_name: &str) -> Result<PathBuf, ArtifactError> {
        check_name(file_name)?;
        Ok(self.root.join(file_name))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, file_name: &str, bytes: Bytes) -> Result<(), ArtifactError> {
        let path = self.path_for(file_name)?;
        // Write-then-rename so readers never see a half-written PDF.
        let staging = self.root.join(format!(".{file_name}.partial"));
        tokio::fs::write(&staging, &bytes).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn fetch(&self, file_name: &str) -> Result<Bytes, ArtifactError> {
        let path = self.path_for(file_name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(file_name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, file_name: &str) -> Result<(), ArtifactError> {
        let path = self.path_for(file_name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// S3 / MinIO
// ────────────────────────────────────────────────────────────────────────────

pub struct S3ArtifactStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ArtifactStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    fn key_for(&self, file_name: &str) -> Result<String, ArtifactError> {
        check_name(file_name)?;
        Ok(format!("{S3_PREFIX}/{file_name}"))
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put(&self, file_name: &str, bytes: Bytes) -> Result<(), ArtifactError> {
        let key = self.key_for(file_name)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(PDF_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| ArtifactError::S3(format!("upload failed: {e}")))?;

        info!("Uploaded render artifact to s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn fetch(&self, file_name: &str) -> Result<Bytes, ArtifactError> {
        let key = self.key_for(file_name)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    ArtifactError::NotFound(file_name.to_string())
                } else {
                    ArtifactError::S3(format!("download failed: {e}"))
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| ArtifactError::S3(format!("download failed: {e}")))?;
        Ok(data.into_bytes())
    }

    async fn delete(&self, file_name: &str) -> Result<(), ArtifactError> {
        let key = self.key_for(file_name)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| ArtifactError::S3(format!("delete failed: {e}")))?;
        Ok(())
    }
}
