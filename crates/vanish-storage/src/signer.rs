// HMAC-SHA256 capability URLs for stored blobs.
// Format: {base}/{path}?exp={unix secs}&sig={hex hmac("{path}:{exp}")}

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signed URL has expired")]
    Expired,
    #[error("signature does not match")]
    Invalid,
}

#[derive(Clone)]
pub struct UrlSigner {
    key: Vec<u8>,
    base: Url,
}

impl UrlSigner {
    /// `base` is the public prefix blobs are served under, e.g.
    /// `https://vanish.example/blobs`.
    pub fn new(key: &[u8], base: &str) -> Result<Self> {
        let mut base = Url::parse(base).with_context(|| format!("Invalid blob base URL '{}'", base))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            key: key.to_vec(),
            base,
        })
    }

    pub fn sign(&self, path: &str, ttl: Duration, now: DateTime<Utc>) -> Result<String> {
        let expires = (now + ttl).timestamp();
        let signature = hex::encode(self.mac(path, expires)?.finalize().into_bytes());

        let mut url = self
            .base
            .join(path)
            .with_context(|| format!("Cannot build URL for '{}'", path))?;
        url.query_pairs_mut()
            .append_pair("exp", &expires.to_string())
            .append_pair("sig", &signature);
        Ok(url.into())
    }

    /// Expiry is checked before the signature.
    pub fn verify(
        &self,
        path: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        if now.timestamp() > expires {
            return Err(SignatureError::Expired);
        }

        let provided = hex::decode(signature).map_err(|_| SignatureError::Invalid)?;
        self.mac(path, expires)
            .map_err(|_| SignatureError::Invalid)?
            .verify_slice(&provided)
            .map_err(|_| SignatureError::Invalid)
    }

    /// Inverse of [`UrlSigner::sign`] for the path component. Query string is ignored.
    pub fn path_from_url(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        if url.origin() != self.base.origin() {
            return None;
        }
        let path = url.path().strip_prefix(self.base.path())?;
        (!path.is_empty()).then(|| path.to_string())
    }

    fn mac(&self, path: &str, expires: i64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| anyhow!("HMAC key rejected"))?;
        mac.update(format!("{}:{}", path, expires).as_bytes());
        Ok(mac)
    }
}
