use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                id                      TEXT PRIMARY KEY,
                content                 TEXT NOT NULL,
                timestamp               TEXT NOT NULL,
                author_id               TEXT NOT NULL,
                author_username         TEXT NOT NULL,
                author_discriminator    TEXT,
                author_avatar           TEXT,
                channel_id              TEXT,
                guild_id                TEXT,
                attachment_ids          TEXT NOT NULL DEFAULT '[]',
                attachment_count        INTEGER NOT NULL DEFAULT 0,
                ingested_at             TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_messages_timestamp
                ON messages(timestamp);
            CREATE INDEX IF NOT EXISTS idx_messages_channel
                ON messages(channel_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_messages_guild
                ON messages(guild_id, timestamp);

            -- No foreign key: attachments land before their message row.
            CREATE TABLE IF NOT EXISTS attachments (
                id              TEXT PRIMARY KEY,
                message_id      TEXT NOT NULL,
                filename        TEXT NOT NULL,
                size            INTEGER NOT NULL,
                content_type    TEXT NOT NULL,
                data            TEXT NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_attachments_message
                ON attachments(message_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
