use crate::Database;
use crate::models::{MessageRow, ReadReceipt, format_timestamp};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use vanish_types::api::ListCursor;
use vanish_types::models::Message;

const MESSAGE_COLUMNS: &str = "id, image_url, views, is_read, last_read_at, client_ip, \
                               viewer_email, auto_delete, expire_at, created_at";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, image_url, views, is_read, last_read_at, client_ip,
                                       viewer_email, auto_delete, expire_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    message.id.to_string(),
                    message.image_url,
                    message.views as i64,
                    message.is_read,
                    message.last_read_at.map(format_timestamp),
                    message.client_ip,
                    message.viewer_email,
                    message.auto_delete,
                    message.expire_at.map(format_timestamp),
                    format_timestamp(message.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Newest first, keyset-paged on `(created_at, id)`. Pass the cursor of
    /// the last row seen to get the next, older page.
    pub fn list_messages(&self, limit: u32, before: Option<&ListCursor>) -> Result<Vec<Message>> {
        let cursor_ts = before.map(|c| format_timestamp(c.created_at));
        let cursor_id = before.map(|c| c.id.to_string());
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE ?1 IS NULL
                    OR created_at < ?1
                    OR (created_at = ?1 AND id < ?2)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![cursor_ts, cursor_id, limit], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(Message::try_from).collect()
        })
    }

    /// Returns whether a row was removed.
    pub fn delete_message(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(removed > 0)
        })
    }

    /// Burn-after-reading claim. Deletes the row only if it is an unread,
    /// unexpired auto-delete message, returning the image URL it held.
    /// At most one caller can ever get `Some` for a given id.
    ///
    /// In the same transaction the blob is queued for removal once
    /// `blob_delete_after` has passed.
    pub fn claim_auto_delete(
        &self,
        id: &str,
        now: DateTime<Utc>,
        blob_delete_after: DateTime<Utc>,
    ) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let image_url = tx
                .query_row(
                    "DELETE FROM messages
                     WHERE id = ?1
                       AND auto_delete = 1
                       AND is_read = 0
                       AND (expire_at IS NULL OR expire_at >= ?2)
                     RETURNING image_url",
                    rusqlite::params![id, format_timestamp(now)],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;

            if let Some(url) = &image_url {
                tx.execute(
                    "INSERT OR REPLACE INTO pending_blob_deletions (image_url, delete_after)
                     VALUES (?1, ?2)",
                    rusqlite::params![url, format_timestamp(blob_delete_after)],
                )?;
            }
            tx.commit()?;
            Ok(image_url)
        })
    }

    /// Counted read. `views = views + 1` is evaluated by SQLite in the same
    /// statement that checks the row is still live, so increments never race.
    /// A `None` viewer email keeps whatever was captured before.
    pub fn increment_read(
        &self,
        id: &str,
        now: DateTime<Utc>,
        client_ip: Option<&str>,
        viewer_email: Option<&str>,
    ) -> Result<Option<ReadReceipt>> {
        self.with_conn(|conn| {
            let receipt = conn
                .query_row(
                    "UPDATE messages
                     SET views = views + 1,
                         is_read = 1,
                         last_read_at = ?2,
                         client_ip = ?3,
                         viewer_email = COALESCE(?4, viewer_email)
                     WHERE id = ?1
                       AND auto_delete = 0
                       AND (expire_at IS NULL OR expire_at >= ?2)
                     RETURNING image_url, views",
                    rusqlite::params![id, format_timestamp(now), client_ip, viewer_email],
                    |row| {
                        Ok(ReadReceipt {
                            image_url: row.get(0)?,
                            views: row.get::<_, i64>(1)?.max(0) as u64,
                        })
                    },
                )
                .optional()?;
            Ok(receipt)
        })
    }

    /// Rows whose `expire_at` has passed. Used only by the optional reaper.
    pub fn expired_messages(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE expire_at IS NOT NULL AND expire_at < ?1
                 ORDER BY expire_at
                 LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![format_timestamp(now), limit], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(Message::try_from).collect()
        })
    }

    /// Image URLs of burned messages whose viewing window has closed.
    pub fn due_blob_deletions(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT image_url FROM pending_blob_deletions
                 WHERE delete_after < ?1
                 ORDER BY delete_after
                 LIMIT ?2",
            )?;
            let urls = stmt
                .query_map(rusqlite::params![format_timestamp(now), limit], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(urls)
        })
    }

    pub fn clear_blob_deletion(&self, image_url: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM pending_blob_deletions WHERE image_url = ?1",
                [image_url],
            )?;
            Ok(removed > 0)
        })
    }

    /// Deletes the row only if it is still expired at `now`.
    pub fn delete_expired(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM messages WHERE id = ?1 AND expire_at IS NOT NULL AND expire_at < ?2",
                rusqlite::params![id, format_timestamp(now)],
            )?;
            Ok(removed > 0)
        })
    }
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<Message>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([id], map_message_row).optional()?;

    row.map(Message::try_from).transpose()
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        image_url: row.get(1)?,
        views: row.get(2)?,
        is_read: row.get(3)?,
        last_read_at: row.get(4)?,
        client_ip: row.get(5)?,
        viewer_email: row.get(6)?,
        auto_delete: row.get(7)?,
        expire_at: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn new_message(auto_delete: bool, expire_at: Option<DateTime<Utc>>) -> Message {
        let id = Uuid::new_v4();
        Message {
            id,
            image_url: format!("http://localhost:3000/blobs/images/{id}-cat.png?exp=1&sig=00"),
            views: 0,
            is_read: false,
            last_read_at: None,
            client_ip: None,
            viewer_email: None,
            auto_delete,
            expire_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let msg = new_message(false, Some(Utc::now() + Duration::days(1)));
        db.insert_message(&msg).unwrap();

        let loaded = db.get_message(&msg.id.to_string()).unwrap().unwrap();
        assert_eq!(loaded.id, msg.id);
        assert_eq!(loaded.image_url, msg.image_url);
        assert_eq!(loaded.views, 0);
        assert!(!loaded.is_read);
        assert!(loaded.expire_at.is_some());

        assert!(db.get_message(&Uuid::new_v4().to_string()).unwrap().is_none());
    }

    #[test]
    fn test_claim_auto_delete_succeeds_once() {
        let db = Database::open_in_memory().unwrap();
        let msg = new_message(true, None);
        db.insert_message(&msg).unwrap();
        let id = msg.id.to_string();

        let first = db.claim_auto_delete(&id, Utc::now(), Utc::now()).unwrap();
        assert_eq!(first.as_deref(), Some(msg.image_url.as_str()));
        assert!(db.claim_auto_delete(&id, Utc::now(), Utc::now()).unwrap().is_none());
        assert!(db.get_message(&id).unwrap().is_none());
    }

    #[test]
    fn test_claim_ignores_regular_and_expired_messages() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        let regular = new_message(false, None);
        let expired = new_message(true, Some(now - Duration::minutes(1)));
        db.insert_message(&regular).unwrap();
        db.insert_message(&expired).unwrap();

        assert!(db.claim_auto_delete(&regular.id.to_string(), now, now).unwrap().is_none());
        assert!(db.claim_auto_delete(&expired.id.to_string(), now, now).unwrap().is_none());
        assert!(db.get_message(&expired.id.to_string()).unwrap().is_some());
    }

    #[test]
    fn test_increment_read_counts_and_records_viewer() {
        let db = Database::open_in_memory().unwrap();
        let msg = new_message(false, None);
        db.insert_message(&msg).unwrap();
        let id = msg.id.to_string();
        let now = Utc::now();

        let r1 = db
            .increment_read(&id, now, Some("10.0.0.1"), Some("viewer@example.com"))
            .unwrap()
            .unwrap();
        assert_eq!(r1.views, 1);
        let r2 = db.increment_read(&id, now, Some("10.0.0.2"), None).unwrap().unwrap();
        assert_eq!(r2.views, 2);

        let loaded = db.get_message(&id).unwrap().unwrap();
        assert!(loaded.is_read);
        assert_eq!(loaded.views, 2);
        assert_eq!(loaded.client_ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(loaded.viewer_email.as_deref(), Some("viewer@example.com"));
        assert!(loaded.last_read_at.is_some());
    }

    #[test]
    fn test_increment_read_refuses_expired_and_auto_delete() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let expired = new_message(false, Some(now - Duration::seconds(5)));
        let burn = new_message(true, None);
        db.insert_message(&expired).unwrap();
        db.insert_message(&burn).unwrap();

        assert!(db.increment_read(&expired.id.to_string(), now, None, None).unwrap().is_none());
        assert!(db.increment_read(&burn.id.to_string(), now, None, None).unwrap().is_none());
        assert_eq!(db.get_message(&expired.id.to_string()).unwrap().unwrap().views, 0);
    }

    #[test]
    fn test_deleted_id_is_never_reused() {
        let db = Database::open_in_memory().unwrap();
        let msg = new_message(false, None);
        db.insert_message(&msg).unwrap();

        assert!(db.delete_message(&msg.id.to_string()).unwrap());
        assert!(!db.delete_message(&msg.id.to_string()).unwrap());
        assert!(db.insert_message(&msg).is_err());
    }

    #[test]
    fn test_list_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let mut older = new_message(false, None);
        older.created_at = Utc::now() - Duration::hours(1);
        let newer = new_message(false, None);
        db.insert_message(&older).unwrap();
        db.insert_message(&newer).unwrap();

        let listed = db.list_messages(10, None).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[test]
    fn test_list_pages_through_identical_timestamps() {
        let db = Database::open_in_memory().unwrap();
        let created_at = Utc::now();
        for _ in 0..5 {
            let mut msg = new_message(false, None);
            msg.created_at = created_at;
            db.insert_message(&msg).unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        for _ in 0..10 {
            let page = db.list_messages(2, cursor.as_ref()).unwrap();
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(ListCursor::after);
            seen.extend(page.into_iter().map(|m| m.id));
        }

        assert_eq!(seen.len(), 5);
        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn test_claim_queues_blob_for_deletion() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let msg = new_message(true, None);
        db.insert_message(&msg).unwrap();

        let window = now + Duration::days(1);
        db.claim_auto_delete(&msg.id.to_string(), now, window).unwrap().unwrap();

        assert!(db.due_blob_deletions(now, 10).unwrap().is_empty());
        let due = db.due_blob_deletions(window + Duration::seconds(1), 10).unwrap();
        assert_eq!(due, vec![msg.image_url.clone()]);

        assert!(db.clear_blob_deletion(&msg.image_url).unwrap());
        assert!(!db.clear_blob_deletion(&msg.image_url).unwrap());
        assert!(db.due_blob_deletions(window + Duration::days(1), 10).unwrap().is_empty());
    }

    #[test]
    fn test_lost_claim_queues_nothing() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let regular = new_message(false, None);
        db.insert_message(&regular).unwrap();

        assert!(db.claim_auto_delete(&regular.id.to_string(), now, now).unwrap().is_none());
        assert!(db.due_blob_deletions(now + Duration::days(30), 10).unwrap().is_empty());
    }

    #[test]
    fn test_expired_messages_and_delete_expired() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let stale = new_message(false, Some(now - Duration::days(1)));
        let fresh = new_message(false, Some(now + Duration::days(1)));
        let forever = new_message(false, None);
        for m in [&stale, &fresh, &forever] {
            db.insert_message(m).unwrap();
        }

        let expired = db.expired_messages(now, 100).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);

        assert!(!db.delete_expired(&fresh.id.to_string(), now).unwrap());
        assert!(db.delete_expired(&stale.id.to_string(), now).unwrap());
        assert!(db.expired_messages(now, 100).unwrap().is_empty());
    }
}
