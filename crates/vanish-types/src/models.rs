use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Longest TTL an upload may request (ten years).
pub const MAX_TTL_DAYS: i64 = 3650;

/// Signed URL lifetime for messages that never expire.
pub const PERMANENT_URL_DAYS: i64 = MAX_TTL_DAYS;

/// Signed URL lifetime for burn-after-reading messages without a TTL.
pub const AUTO_DELETE_URL_DAYS: i64 = 1;

/// One disposable image share. The `id` doubles as the public link token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub image_url: String,
    pub views: u64,
    pub is_read: bool,
    pub last_read_at: Option<DateTime<Utc>>,
    pub client_ip: Option<String>,
    pub viewer_email: Option<String>,
    pub auto_delete: bool,
    pub expire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Expiry is lazy: a row past `expire_at` may still exist but is never served.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expire_at, Some(expire_at) if expire_at < now)
    }

    /// When the signed image URL handed out at creation stops working.
    /// Mirrors `Policy::url_ttl` for the stored fields.
    pub fn link_expires_at(&self) -> DateTime<Utc> {
        match (self.expire_at, self.auto_delete) {
            (Some(expire_at), _) => expire_at,
            (None, true) => self.created_at + Duration::days(AUTO_DELETE_URL_DAYS),
            (None, false) => self.created_at + Duration::days(PERMANENT_URL_DAYS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("ttlDays must not be negative")]
    NegativeTtl,
    #[error("ttlDays must be at most {MAX_TTL_DAYS}")]
    TtlTooLong,
}

/// Destruction policy chosen at upload time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Policy {
    auto_delete: bool,
    ttl_days: u32,
}

impl Policy {
    pub fn new(auto_delete: bool, ttl_days: i64) -> Result<Self, PolicyError> {
        if ttl_days < 0 {
            return Err(PolicyError::NegativeTtl);
        }
        if ttl_days > MAX_TTL_DAYS {
            return Err(PolicyError::TtlTooLong);
        }
        Ok(Self {
            auto_delete,
            ttl_days: ttl_days as u32,
        })
    }

    pub fn auto_delete(&self) -> bool {
        self.auto_delete
    }

    pub fn ttl_days(&self) -> u32 {
        self.ttl_days
    }

    /// `None` when the message never expires.
    pub fn expire_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.ttl_days > 0).then(|| now + Duration::days(i64::from(self.ttl_days)))
    }

    /// How long the signed image URL stays valid.
    pub fn url_ttl(&self) -> Duration {
        if self.ttl_days > 0 {
            Duration::days(i64::from(self.ttl_days))
        } else if self.auto_delete {
            Duration::days(AUTO_DELETE_URL_DAYS)
        } else {
            Duration::days(PERMANENT_URL_DAYS)
        }
    }
}
