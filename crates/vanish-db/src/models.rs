//! Database row types. These map directly to SQLite rows.
//! Conversion into `vanish_types::models::Message` is where row shapes are validated.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use vanish_types::models::Message;

pub struct MessageRow {
    pub id: String,
    pub image_url: String,
    pub views: i64,
    pub is_read: bool,
    pub last_read_at: Option<String>,
    pub client_ip: Option<String>,
    pub viewer_email: Option<String>,
    pub auto_delete: bool,
    pub expire_at: Option<String>,
    pub created_at: String,
}

/// Outcome of a counted read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub image_url: String,
    pub views: u64,
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        if row.views < 0 {
            bail!("Corrupt views {} on message '{}'", row.views, row.id);
        }

        Ok(Message {
            id: row
                .id
                .parse()
                .with_context(|| format!("Corrupt message id '{}'", row.id))?,
            image_url: row.image_url,
            views: row.views as u64,
            is_read: row.is_read,
            last_read_at: row.last_read_at.as_deref().map(parse_timestamp).transpose()?,
            client_ip: row.client_ip,
            viewer_email: row.viewer_email,
            auto_delete: row.auto_delete,
            expire_at: row.expire_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

/// Fixed-width RFC 3339 so that SQL string comparison matches time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat it as UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("Corrupt timestamp '{}'", raw))
}
