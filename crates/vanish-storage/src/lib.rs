pub mod local;
pub mod signer;

use std::pin::Pin;

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use tokio::io::AsyncRead;
use uuid::Uuid;

pub use local::LocalBlobStore;
pub use signer::{SignatureError, UrlSigner};

/// Raster formats accepted for upload, with the file extensions each may use.
/// SVG is deliberately absent: it is served from our own origin.
const IMAGE_TYPES: &[(&str, &[&str])] = &[
    ("image/png", &["png"]),
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/gif", &["gif"]),
    ("image/webp", &["webp"]),
    ("image/avif", &["avif"]),
    ("image/bmp", &["bmp"]),
];

const MAX_NAME_LEN: usize = 100;

/// A readable stored blob.
pub struct BlobReader {
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    pub len: u64,
    pub content_type: &'static str,
}

/// Object storage for uploaded images.
///
/// Paths are relative, `/`-separated and restricted to `[A-Za-z0-9._-]`
/// segments (see [`validate_object_path`]).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` at `path`. The blob is not visible until fully written.
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<()>;

    /// `None` if nothing is stored at `path`.
    async fn open(&self, path: &str) -> Result<Option<BlobReader>>;

    /// Removing a missing blob is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Time-limited capability URL for `path`, valid until `now + ttl`.
    fn signed_url(&self, path: &str, ttl: Duration, now: DateTime<Utc>) -> Result<String>;

    /// Check a presented signature for `path`.
    fn verify(
        &self,
        path: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError>;

    /// Recover the object path from a URL produced by [`BlobStore::signed_url`].
    fn path_from_url(&self, url: &str) -> Option<String>;
}

pub fn is_supported_image(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    IMAGE_TYPES.iter().any(|(ct, _)| ct.eq_ignore_ascii_case(essence))
}

/// Content type to serve a stored blob with, by extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    IMAGE_TYPES
        .iter()
        .find(|(_, exts)| ext.as_deref().is_some_and(|e| exts.contains(&e)))
        .map(|(ct, _)| *ct)
        .unwrap_or("application/octet-stream")
}

/// Storage path for a new upload: `images/<id>-<sanitized original name>`.
/// The extension is forced to agree with `content_type`.
pub fn object_path(id: Uuid, original_name: &str, content_type: &str) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let mut name: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_NAME_LEN)
        .collect();
    name = name.trim_start_matches('.').to_string();
    if name.is_empty() {
        name = "image".to_string();
    }

    let essence = content_type.split(';').next().unwrap_or_default().trim();
    if let Some((expected, exts)) = IMAGE_TYPES.iter().find(|(ct, _)| ct.eq_ignore_ascii_case(essence)) {
        if content_type_for(&name) != *expected {
            name = format!("{}.{}", name, exts[0]);
        }
    }

    format!("images/{}-{}", id, name)
}

/// Rejects anything that could escape the storage root.
pub fn validate_object_path(path: &str) -> Result<()> {
    if path.is_empty() || path.starts_with('/') {
        bail!("Invalid object path '{}'", path);
    }
    for segment in path.split('/') {
        let allowed = segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');
        if segment.is_empty() || segment == "." || segment == ".." || !allowed {
            bail!("Invalid object path '{}'", path);
        }
    }
    Ok(())
}
