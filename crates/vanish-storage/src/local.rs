use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::signer::{SignatureError, UrlSigner};
use crate::{BlobReader, BlobStore, content_type_for, validate_object_path};

/// Blob storage on local disk.
///
/// Each object lives at `{root}/{path}`. Writes go to a `.part` sibling and are
/// renamed into place, so a blob is either absent or complete.
pub struct LocalBlobStore {
    root: PathBuf,
    signer: UrlSigner,
}

impl LocalBlobStore {
    pub async fn new(root: PathBuf, signer: UrlSigner) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        info!("Blob storage directory: {}", root.display());
        Ok(Self { root, signer })
    }

    /// Filesystem location for an object path.
    pub fn file_path(&self, path: &str) -> Result<PathBuf> {
        validate_object_path(path)?;
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<()> {
        let target = self.file_path(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut staging = target.clone().into_os_string();
        staging.push(".part");
        let staging = PathBuf::from(staging);
        let mut file = fs::File::create(&staging).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&staging, &target).await?;

        info!("Stored blob {} ({} bytes, {})", path, data.len(), content_type);
        Ok(())
    }

    async fn open(&self, path: &str) -> Result<Option<BlobReader>> {
        let target = self.file_path(path)?;
        let file = match fs::File::open(&target).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        Ok(Some(BlobReader {
            reader: Box::pin(file),
            len,
            content_type: content_type_for(path),
        }))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.file_path(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => {
                info!("Deleted blob {}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob {} already gone", path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn signed_url(&self, path: &str, ttl: Duration, now: DateTime<Utc>) -> Result<String> {
        validate_object_path(path)?;
        self.signer.sign(path, ttl, now)
    }

    fn verify(
        &self,
        path: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        self.signer.verify(path, expires, signature, now)
    }

    fn path_from_url(&self, url: &str) -> Option<String> {
        self.signer
            .path_from_url(url)
            .filter(|path| validate_object_path(path).is_ok())
    }
}
