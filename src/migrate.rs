use sqlx::SqlitePool;

use crate::error::Result;

/// Create the schema. Idempotent; safe to run at every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Mail accounts known to the assistant
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            email TEXT PRIMARY KEY,
            is_primary INTEGER NOT NULL DEFAULT 0,
            added_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-account sync cursors (last processed change id)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cursors (
            account TEXT PRIMARY KEY,
            cursor TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexed relevant messages
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            account TEXT NOT NULL,
            thread_id TEXT,
            sender TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            ts INTEGER NOT NULL,
            labels_json TEXT NOT NULL DEFAULT '[]',
            dedup_hash TEXT NOT NULL,
            indexed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedding vectors, one per message, replaced on re-upsert
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS message_vectors (
            message_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            model TEXT NOT NULL,
            FOREIGN KEY (message_id) REFERENCES messages(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_ts ON messages(ts DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_account ON messages(account)")
        .execute(pool)
        .await?;

    Ok(())
}
