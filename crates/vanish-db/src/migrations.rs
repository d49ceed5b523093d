use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (messages)");
        conn.execute_batch(
            "
            CREATE TABLE messages (
                id            TEXT PRIMARY KEY,
                image_url     TEXT NOT NULL,
                views         INTEGER NOT NULL DEFAULT 0 CHECK (views >= 0),
                is_read       INTEGER NOT NULL DEFAULT 0,
                last_read_at  TEXT,
                client_ip     TEXT,
                viewer_email  TEXT,
                auto_delete   INTEGER NOT NULL DEFAULT 0,
                expire_at     TEXT,
                created_at    TEXT NOT NULL
            );

            CREATE INDEX idx_messages_created ON messages(created_at);
            CREATE INDEX idx_messages_expire ON messages(expire_at)
                WHERE expire_at IS NOT NULL;

            -- Ids of deleted messages; a link token is never handed out twice.
            CREATE TABLE retired_ids (
                id          TEXT PRIMARY KEY,
                retired_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TRIGGER messages_retire_id AFTER DELETE ON messages
            BEGIN
                INSERT OR IGNORE INTO retired_ids (id) VALUES (old.id);
            END;

            CREATE TRIGGER messages_no_id_reuse BEFORE INSERT ON messages
            WHEN EXISTS (SELECT 1 FROM retired_ids WHERE id = new.id)
            BEGIN
                SELECT RAISE(ABORT, 'message id was already used');
            END;

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (pending blob deletions)");
        conn.execute_batch(
            "
            -- Blobs of burned messages. The viewer's signed URL outlives the row,
            -- so the file stays until the URL dies, then the sweep removes it.
            CREATE TABLE pending_blob_deletions (
                image_url     TEXT PRIMARY KEY,
                delete_after  TEXT NOT NULL
            );

            CREATE INDEX idx_pending_blob_due ON pending_blob_deletions(delete_after);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
