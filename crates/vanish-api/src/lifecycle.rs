//! Message lifecycle: create, read, delete.
//!
//! State per message is `UNREAD -> READ -> DELETED`, with expiry evaluated on
//! every access instead of stored. Expiry is checked first; an unexpired
//! auto-delete message is destroyed by its first read instead of being counted.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vanish_db::Database;
use vanish_storage::{BlobStore, is_supported_image, object_path};
use vanish_types::api::{ListCursor, MessageListItem, MessagePage};
use vanish_types::models::{Message, Policy};

use crate::error::LifecycleError;

/// 20 MB upload limit for images
pub const MAX_IMAGE_SIZE: usize = 20 * 1024 * 1024;

/// Admin listing page size when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const MAX_PAGE_SIZE: u32 = 500;

const REAP_BATCH: u32 = 200;
const MAX_EMAIL_LEN: usize = 254;

/// Request-side details of a read.
#[derive(Debug, Clone, Default)]
pub struct ReadEvent {
    pub client_ip: Option<String>,
    pub viewer_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub image_url: String,
    pub views: u64,
    /// The read consumed an auto-delete message.
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedMessage {
    pub id: Uuid,
    pub link: String,
}

/// An image upload as received from the transport layer.
pub struct Upload {
    pub data: Bytes,
    pub file_name: String,
    pub content_type: String,
}

#[derive(Clone)]
pub struct Lifecycle {
    db: Arc<Database>,
    blobs: Arc<dyn BlobStore>,
    site_url: String,
}

impl Lifecycle {
    pub fn new(db: Arc<Database>, blobs: Arc<dyn BlobStore>, site_url: &str) -> Self {
        Self {
            db,
            blobs,
            site_url: site_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Public link for a message id.
    pub fn share_link(&self, id: Uuid) -> String {
        format!("{}/message/{}", self.site_url, id)
    }

    pub async fn record_read(&self, id: &str, event: ReadEvent) -> Result<ReadOutcome, LifecycleError> {
        self.record_read_at(id, event, Utc::now()).await
    }

    pub async fn record_read_at(
        &self,
        id: &str,
        event: ReadEvent,
        now: DateTime<Utc>,
    ) -> Result<ReadOutcome, LifecycleError> {
        let key = id
            .parse::<Uuid>()
            .map_err(|_| LifecycleError::NotFound)?
            .to_string();

        let lookup = key.clone();
        let message = self
            .blocking(move |db| db.get_message(&lookup))
            .await?
            .ok_or(LifecycleError::NotFound)?;

        if message.is_expired_at(now) {
            debug!("Read of expired message {}", key);
            return Err(LifecycleError::NotFound);
        }

        if message.auto_delete {
            // The conditional DELETE is the arbiter: of any number of
            // concurrent readers, exactly one gets the row back.
            // The blob outlives the row until the viewer's URL dies.
            let claim_key = key.clone();
            let blob_delete_after = message.link_expires_at();
            let claimed = self
                .blocking(move |db| db.claim_auto_delete(&claim_key, now, blob_delete_after))
                .await?;

            return match claimed {
                Some(image_url) => {
                    info!("Message {} read once and deleted", key);
                    Ok(ReadOutcome {
                        image_url,
                        views: message.views + 1,
                        deleted: true,
                    })
                }
                None => {
                    debug!("Lost auto-delete race for message {}", key);
                    Err(LifecycleError::NotFound)
                }
            };
        }

        let client_ip = event.client_ip;
        let viewer_email = normalize_email(event.viewer_email);
        let read_key = key.clone();
        let receipt = self
            .blocking(move |db| {
                db.increment_read(&read_key, now, client_ip.as_deref(), viewer_email.as_deref())
            })
            .await?
            .ok_or(LifecycleError::NotFound)?;

        debug!("Message {} read ({} views)", key, receipt.views);
        Ok(ReadOutcome {
            image_url: receipt.image_url,
            views: receipt.views,
            deleted: false,
        })
    }

    pub async fn create_message(&self, upload: Upload, policy: Policy) -> Result<CreatedMessage, LifecycleError> {
        self.create_message_at(upload, policy, Utc::now()).await
    }

    /// Blob first, row second: a row never points at a blob that failed to
    /// store. A stored blob whose row insert fails is removed best-effort.
    pub async fn create_message_at(
        &self,
        upload: Upload,
        policy: Policy,
        now: DateTime<Utc>,
    ) -> Result<CreatedMessage, LifecycleError> {
        if upload.data.is_empty() {
            return Err(LifecycleError::Validation("image file is required".into()));
        }
        if upload.data.len() > MAX_IMAGE_SIZE {
            return Err(LifecycleError::Validation("image is too large".into()));
        }
        if !is_supported_image(&upload.content_type) {
            return Err(LifecycleError::Validation(format!(
                "unsupported image type '{}'",
                upload.content_type
            )));
        }

        let id = Uuid::new_v4();
        let path = object_path(id, &upload.file_name, &upload.content_type);

        self.blobs
            .put(&path, upload.data, &upload.content_type)
            .await
            .map_err(|e| {
                error!("Blob upload failed for {}: {:#}", path, e);
                LifecycleError::Upstream(e)
            })?;

        let image_url = self
            .blobs
            .signed_url(&path, policy.url_ttl(), now)
            .map_err(|e| {
                error!("Signing URL failed for {}: {:#}", path, e);
                LifecycleError::Upstream(e)
            })?;

        let message = Message {
            id,
            image_url,
            views: 0,
            is_read: false,
            last_read_at: None,
            client_ip: None,
            viewer_email: None,
            auto_delete: policy.auto_delete(),
            expire_at: policy.expire_at(now),
            created_at: now,
        };

        if let Err(e) = self.blocking(move |db| db.insert_message(&message)).await {
            if let Err(cleanup) = self.blobs.delete(&path).await {
                warn!("Could not remove orphaned blob {}: {:#}", path, cleanup);
            }
            return Err(e);
        }

        info!(
            "Message {} created (auto_delete={}, ttl_days={})",
            id,
            policy.auto_delete(),
            policy.ttl_days()
        );

        Ok(CreatedMessage {
            id,
            link: self.share_link(id),
        })
    }

    /// The row deletion is authoritative; blob removal is best-effort.
    pub async fn delete_message(&self, id: &str) -> Result<(), LifecycleError> {
        let key = id
            .parse::<Uuid>()
            .map_err(|_| LifecycleError::Validation("malformed message id".into()))?
            .to_string();

        let lookup = key.clone();
        let message = self
            .blocking(move |db| db.get_message(&lookup))
            .await?
            .ok_or(LifecycleError::NotFound)?;

        self.remove_blob(&message.image_url).await;

        let delete_key = key.clone();
        let removed = self.blocking(move |db| db.delete_message(&delete_key)).await?;
        if !removed {
            return Err(LifecycleError::NotFound);
        }

        info!("Message {} deleted", key);
        Ok(())
    }

    pub async fn list_messages(
        &self,
        limit: u32,
        before: Option<ListCursor>,
    ) -> Result<MessagePage, LifecycleError> {
        self.list_messages_at(Utc::now(), limit, before).await
    }

    /// One page of the listing, newest first. `limit` is clamped to
    /// `1..=MAX_PAGE_SIZE`.
    pub async fn list_messages_at(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        before: Option<ListCursor>,
    ) -> Result<MessagePage, LifecycleError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let mut messages = self
            .blocking(move |db| db.list_messages(limit + 1, before.as_ref()))
            .await?;

        let next = if messages.len() > limit as usize {
            messages.truncate(limit as usize);
            messages.last().map(|m| ListCursor::after(m).to_string())
        } else {
            None
        };

        Ok(MessagePage {
            messages: messages
                .into_iter()
                .map(|message| MessageListItem {
                    expired: message.is_expired_at(now),
                    message,
                })
                .collect(),
            next,
        })
    }

    /// Delete rows whose expiry has passed, with their blobs. Returns the
    /// number of rows removed.
    pub async fn reap_expired_at(&self, now: DateTime<Utc>) -> Result<usize, LifecycleError> {
        let expired = self.blocking(move |db| db.expired_messages(now, REAP_BATCH)).await?;

        let mut count = 0;
        for message in expired {
            let key = message.id.to_string();
            let removed = self.blocking(move |db| db.delete_expired(&key, now)).await?;
            if removed {
                self.remove_blob(&message.image_url).await;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Remove blobs of burned messages once their signed URLs have expired.
    /// A blob that fails to delete stays queued for the next sweep.
    pub async fn reclaim_blobs_at(&self, now: DateTime<Utc>) -> Result<usize, LifecycleError> {
        let due = self.blocking(move |db| db.due_blob_deletions(now, REAP_BATCH)).await?;

        let mut count = 0;
        for image_url in due {
            if !self.remove_blob(&image_url).await {
                continue;
            }
            let key = image_url.clone();
            if self.blocking(move |db| db.clear_blob_deletion(&key)).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Best-effort. Returns false only when the store refused the delete;
    /// an underivable path is logged and treated as done.
    async fn remove_blob(&self, image_url: &str) -> bool {
        match self.blobs.path_from_url(image_url) {
            Some(path) => match self.blobs.delete(&path).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to delete blob {}: {:#}", path, e);
                    false
                }
            },
            None => {
                warn!("Cannot derive blob path from {}", image_url);
                true
            }
        }
    }

    /// Run blocking DB work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T, LifecycleError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                LifecycleError::Upstream(anyhow::anyhow!("database task failed"))
            })?
            .map_err(LifecycleError::Upstream)
    }
}

/// Viewer emails are optional; anything that does not look like one is dropped.
fn normalize_email(raw: Option<String>) -> Option<String> {
    let email = raw?.trim().to_string();
    let valid = email.len() <= MAX_EMAIL_LEN
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    valid.then_some(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use vanish_storage::{BlobReader, LocalBlobStore, SignatureError, UrlSigner};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

    struct Harness {
        engine: Lifecycle,
        db: Arc<Database>,
        blobs: Arc<LocalBlobStore>,
        dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let signer = UrlSigner::new(b"service-key", "http://localhost:3000/blobs").unwrap();
        let blobs = Arc::new(LocalBlobStore::new(dir.path().to_path_buf(), signer).await.unwrap());
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engine = Lifecycle::new(db.clone(), blobs.clone(), "http://localhost:3000/");
        Harness {
            engine,
            db,
            blobs,
            dir,
        }
    }

    fn upload() -> Upload {
        Upload {
            data: Bytes::from_static(PNG),
            file_name: "cat.png".into(),
            content_type: "image/png".into(),
        }
    }

    fn policy(auto_delete: bool, ttl_days: i64) -> Policy {
        Policy::new(auto_delete, ttl_days).unwrap()
    }

    async fn blob_exists(h: &Harness, image_url: &str) -> bool {
        let path = h.blobs.path_from_url(image_url).unwrap();
        h.blobs.open(&path).await.unwrap().is_some()
    }

    #[tokio::test]
    async fn test_create_returns_link_and_stores_blob() {
        let h = harness().await;
        let created = h.engine.create_message(upload(), policy(false, 0)).await.unwrap();

        assert_eq!(created.link, format!("http://localhost:3000/message/{}", created.id));

        let row = h.db.get_message(&created.id.to_string()).unwrap().unwrap();
        assert_eq!(row.views, 0);
        assert!(!row.is_read);
        assert!(!row.auto_delete);
        assert_eq!(row.expire_at, None);
        assert!(blob_exists(&h, &row.image_url).await);
    }

    #[tokio::test]
    async fn test_auto_delete_message_is_readable_once() {
        let h = harness().await;
        let created = h.engine.create_message(upload(), policy(true, 0)).await.unwrap();
        let id = created.id.to_string();

        let first = h.engine.record_read(&id, ReadEvent::default()).await.unwrap();
        assert!(first.deleted);
        assert!(first.image_url.contains("/blobs/images/"));
        assert!(h.db.get_message(&id).unwrap().is_none());

        let second = h.engine.record_read(&id, ReadEvent::default()).await;
        assert!(matches!(second, Err(LifecycleError::NotFound)));
    }

    #[tokio::test]
    async fn test_concurrent_reads_of_auto_delete_message() {
        let h = harness().await;
        let created = h.engine.create_message(upload(), policy(true, 0)).await.unwrap();
        let id = created.id.to_string();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let engine = h.engine.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                engine.record_read(&id, ReadEvent::default()).await
            }));
        }

        let mut successes = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(outcome) => {
                    assert!(outcome.deleted);
                    successes += 1;
                }
                Err(LifecycleError::NotFound) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_ttl_message_expires() {
        let h = harness().await;
        let t = Utc::now();
        let created = h
            .engine
            .create_message_at(upload(), policy(false, 1), t)
            .await
            .unwrap();
        let id = created.id.to_string();

        let early = h
            .engine
            .record_read_at(&id, ReadEvent::default(), t + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(early.views, 1);
        assert!(!early.deleted);

        let late = h
            .engine
            .record_read_at(&id, ReadEvent::default(), t + Duration::days(2))
            .await;
        assert!(matches!(late, Err(LifecycleError::NotFound)));

        // Expiry is lazy: the row is still there for the admin to clean up.
        let row = h.db.get_message(&id).unwrap().unwrap();
        assert_eq!(row.views, 1);
    }

    #[tokio::test]
    async fn test_expiry_takes_precedence_over_auto_delete() {
        let h = harness().await;
        let t = Utc::now();
        let created = h
            .engine
            .create_message_at(upload(), policy(true, 1), t)
            .await
            .unwrap();
        let id = created.id.to_string();

        let late = h
            .engine
            .record_read_at(&id, ReadEvent::default(), t + Duration::days(3))
            .await;
        assert!(matches!(late, Err(LifecycleError::NotFound)));
        assert!(h.db.get_message(&id).unwrap().is_some());

        let in_time = h
            .engine
            .record_read_at(&id, ReadEvent::default(), t + Duration::hours(2))
            .await
            .unwrap();
        assert!(in_time.deleted);
    }

    #[tokio::test]
    async fn test_permanent_message_counts_every_read() {
        let h = harness().await;
        let created = h.engine.create_message(upload(), policy(false, 0)).await.unwrap();
        let id = created.id.to_string();

        for n in 1..=3u64 {
            let event = ReadEvent {
                client_ip: Some(format!("192.0.2.{n}")),
                viewer_email: (n == 2).then(|| "friend@example.com".to_string()),
            };
            let outcome = h.engine.record_read(&id, event).await.unwrap();
            assert_eq!(outcome.views, n);
            assert!(!outcome.deleted);
        }

        let row = h.db.get_message(&id).unwrap().unwrap();
        assert_eq!(row.views, 3);
        assert!(row.is_read);
        assert!(row.last_read_at.is_some());
        assert_eq!(row.client_ip.as_deref(), Some("192.0.2.3"));
        assert_eq!(row.viewer_email.as_deref(), Some("friend@example.com"));
    }

    #[tokio::test]
    async fn test_read_unknown_or_malformed_id() {
        let h = harness().await;
        let missing = h.engine.record_read(&Uuid::new_v4().to_string(), ReadEvent::default()).await;
        assert!(matches!(missing, Err(LifecycleError::NotFound)));

        let malformed = h.engine.record_read("not-a-uuid", ReadEvent::default()).await;
        assert!(matches!(malformed, Err(LifecycleError::NotFound)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_removes_blob() {
        let h = harness().await;
        let created = h.engine.create_message(upload(), policy(false, 0)).await.unwrap();
        let id = created.id.to_string();
        let image_url = h.db.get_message(&id).unwrap().unwrap().image_url;

        h.engine.delete_message(&id).await.unwrap();
        assert!(h.db.get_message(&id).unwrap().is_none());
        assert!(!blob_exists(&h, &image_url).await);

        let again = h.engine.delete_message(&id).await;
        assert!(matches!(again, Err(LifecycleError::NotFound)));

        let malformed = h.engine.delete_message("../../etc").await;
        assert!(matches!(malformed, Err(LifecycleError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_survives_missing_blob() {
        let h = harness().await;
        let created = h.engine.create_message(upload(), policy(false, 0)).await.unwrap();
        let id = created.id.to_string();
        let image_url = h.db.get_message(&id).unwrap().unwrap().image_url;
        let path = h.blobs.path_from_url(&image_url).unwrap();
        h.blobs.delete(&path).await.unwrap();

        h.engine.delete_message(&id).await.unwrap();
        assert!(h.db.get_message(&id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let h = harness().await;

        let empty = Upload {
            data: Bytes::new(),
            ..upload()
        };
        assert!(matches!(
            h.engine.create_message(empty, policy(false, 0)).await,
            Err(LifecycleError::Validation(_))
        ));

        let html = Upload {
            content_type: "text/html".into(),
            ..upload()
        };
        assert!(matches!(
            h.engine.create_message(html, policy(false, 0)).await,
            Err(LifecycleError::Validation(_))
        ));

        assert!(h.db.list_messages(10, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_flags_expired_rows() {
        let h = harness().await;
        let t = Utc::now();
        h.engine.create_message_at(upload(), policy(false, 1), t).await.unwrap();
        h.engine.create_message_at(upload(), policy(false, 0), t).await.unwrap();

        let listed = h
            .engine
            .list_messages_at(t + Duration::days(2), DEFAULT_PAGE_SIZE, None)
            .await
            .unwrap();
        assert_eq!(listed.messages.len(), 2);
        assert_eq!(listed.messages.iter().filter(|item| item.expired).count(), 1);
        assert!(listed.next.is_none());
    }

    #[tokio::test]
    async fn test_list_is_paged() {
        let h = harness().await;
        let t = Utc::now();
        for n in 0..5 {
            h.engine
                .create_message_at(upload(), policy(false, 0), t + Duration::seconds(n))
                .await
                .unwrap();
        }

        let first = h.engine.list_messages_at(t, 2, None).await.unwrap();
        assert_eq!(first.messages.len(), 2);
        let cursor: ListCursor = first.next.as_deref().unwrap().parse().unwrap();

        let second = h.engine.list_messages_at(t, 2, Some(cursor)).await.unwrap();
        assert_eq!(second.messages.len(), 2);
        assert!(second.messages[0].message.created_at < first.messages[1].message.created_at);

        let cursor: ListCursor = second.next.as_deref().unwrap().parse().unwrap();
        let last = h.engine.list_messages_at(t, 2, Some(cursor)).await.unwrap();
        assert_eq!(last.messages.len(), 1);
        assert!(last.next.is_none());
    }

    #[tokio::test]
    async fn test_reap_expired() {
        let h = harness().await;
        let t = Utc::now();
        let stale = h.engine.create_message_at(upload(), policy(false, 1), t).await.unwrap();
        let kept = h.engine.create_message_at(upload(), policy(false, 0), t).await.unwrap();
        let stale_url = h.db.get_message(&stale.id.to_string()).unwrap().unwrap().image_url;

        let reaped = h.engine.reap_expired_at(t + Duration::days(2)).await.unwrap();
        assert_eq!(reaped, 1);
        assert!(h.db.get_message(&stale.id.to_string()).unwrap().is_none());
        assert!(h.db.get_message(&kept.id.to_string()).unwrap().is_some());
        assert!(!blob_exists(&h, &stale_url).await);
    }

    #[tokio::test]
    async fn test_burned_blob_is_reclaimed_after_link_expires() {
        let h = harness().await;
        let t = Utc::now();
        let created = h
            .engine
            .create_message_at(upload(), policy(true, 0), t)
            .await
            .unwrap();
        let image_url = h.db.get_message(&created.id.to_string()).unwrap().unwrap().image_url;

        h.engine
            .record_read_at(&created.id.to_string(), ReadEvent::default(), t + Duration::minutes(1))
            .await
            .unwrap();

        // The viewer's URL is still live: the image must stay.
        let early = h.engine.reclaim_blobs_at(t + Duration::hours(1)).await.unwrap();
        assert_eq!(early, 0);
        assert!(blob_exists(&h, &image_url).await);

        let late = h.engine.reclaim_blobs_at(t + Duration::days(2)).await.unwrap();
        assert_eq!(late, 1);
        assert!(!blob_exists(&h, &image_url).await);

        let again = h.engine.reclaim_blobs_at(t + Duration::days(3)).await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn test_burned_blob_with_ttl_waits_for_expiry() {
        let h = harness().await;
        let t = Utc::now();
        let created = h
            .engine
            .create_message_at(upload(), policy(true, 5), t)
            .await
            .unwrap();
        let image_url = h.db.get_message(&created.id.to_string()).unwrap().unwrap().image_url;

        h.engine
            .record_read_at(&created.id.to_string(), ReadEvent::default(), t)
            .await
            .unwrap();

        assert_eq!(h.engine.reclaim_blobs_at(t + Duration::days(4)).await.unwrap(), 0);
        assert!(blob_exists(&h, &image_url).await);
        assert_eq!(h.engine.reclaim_blobs_at(t + Duration::days(6)).await.unwrap(), 1);
        assert!(!blob_exists(&h, &image_url).await);
    }

    #[tokio::test]
    async fn test_failed_insert_removes_stored_blob() {
        let h = harness().await;
        h.db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER refuse_inserts BEFORE INSERT ON messages
                 BEGIN
                     SELECT RAISE(ABORT, 'database or disk is full');
                 END;",
            )?;
            Ok(())
        })
        .unwrap();

        let result = h.engine.create_message(upload(), policy(false, 0)).await;
        assert!(matches!(result, Err(LifecycleError::Upstream(_))));

        let leftovers = std::fs::read_dir(h.dir.path().join("images"))
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email(Some(" a@b.co ".into())).as_deref(), Some("a@b.co"));
        assert_eq!(normalize_email(Some("nope".into())), None);
        assert_eq!(normalize_email(Some("@b.co".into())), None);
        assert_eq!(normalize_email(None), None);
    }

    /// Object store that refuses every write or signing request.
    struct BrokenBlobStore {
        fail_put: bool,
    }

    #[async_trait]
    impl BlobStore for BrokenBlobStore {
        async fn put(&self, _path: &str, _data: Bytes, _content_type: &str) -> anyhow::Result<()> {
            if self.fail_put {
                anyhow::bail!("bucket quota exceeded");
            }
            Ok(())
        }

        async fn open(&self, _path: &str) -> anyhow::Result<Option<BlobReader>> {
            Ok(None)
        }

        async fn delete(&self, _path: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn signed_url(&self, _path: &str, _ttl: Duration, _now: DateTime<Utc>) -> anyhow::Result<String> {
            anyhow::bail!("signing key unavailable")
        }

        fn verify(&self, _: &str, _: i64, _: &str, _: DateTime<Utc>) -> Result<(), SignatureError> {
            Err(SignatureError::Invalid)
        }

        fn path_from_url(&self, _url: &str) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn test_store_failures_insert_no_row() {
        for fail_put in [true, false] {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let engine = Lifecycle::new(
                db.clone(),
                Arc::new(BrokenBlobStore { fail_put }),
                "http://localhost:3000",
            );

            let result = engine.create_message(upload(), policy(false, 0)).await;
            assert!(matches!(result, Err(LifecycleError::Upstream(_))));
            assert!(db.list_messages(10, None).unwrap().is_empty());
        }
    }
}
