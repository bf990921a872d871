//! Retrieval store adapter.
//!
//! Wraps the SQLite-backed vector store: idempotent upserts of relevant
//! messages, nearest-neighbour search over their embeddings, and a recency
//! listing for the HTTP surface. Embedding records are append-only from
//! the caller's perspective — a re-upsert replaces by message id, nothing
//! is edited in place.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::Result;
use crate::models::{Message, MessageMeta, SearchHit};

/// Maximum `k` accepted by [`RetrievalStore::search`].
pub const MAX_SEARCH_K: usize = 50;

const EXCERPT_CHARS: usize = 600;

#[derive(Clone)]
pub struct RetrievalStore {
    pool: SqlitePool,
}

impl RetrievalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or overwrite a message by id. Idempotent: upserting the same
    /// message twice leaves exactly one retrievable record with the latest
    /// content. Returns `false` when the stored content hash already
    /// matches, in which case the row is left untouched and the caller can
    /// skip re-embedding.
    pub async fn upsert_message(&self, account: &str, message: &Message) -> Result<bool> {
        let labels_json = serde_json::to_string(&message.labels)?;

        let mut hasher = Sha256::new();
        hasher.update(message.id.as_bytes());
        hasher.update(message.sender.as_bytes());
        hasher.update(message.subject.as_bytes());
        hasher.update(message.body.as_bytes());
        hasher.update(labels_json.as_bytes());
        let dedup_hash = format!("{:x}", hasher.finalize());

        let existing: Option<String> =
            sqlx::query_scalar("SELECT dedup_hash FROM messages WHERE id = ?")
                .bind(&message.id)
                .fetch_optional(&self.pool)
                .await?;
        if existing.as_deref() == Some(dedup_hash.as_str()) {
            return Ok(false);
        }

        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO messages (id, account, thread_id, sender, subject, body, ts, labels_json, dedup_hash, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                account = excluded.account,
                thread_id = excluded.thread_id,
                sender = excluded.sender,
                subject = excluded.subject,
                body = excluded.body,
                ts = excluded.ts,
                labels_json = excluded.labels_json,
                dedup_hash = excluded.dedup_hash,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&message.id)
        .bind(account)
        .bind(&message.thread_id)
        .bind(&message.sender)
        .bind(&message.subject)
        .bind(&message.body)
        .bind(message.timestamp.timestamp())
        .bind(&labels_json)
        .bind(&dedup_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(true)
    }

    /// Store the embedding vector for a message, replacing any previous one.
    pub async fn upsert_embedding(
        &self,
        message_id: &str,
        vector: &[f32],
        model: &str,
    ) -> Result<()> {
        let blob = vec_to_blob(vector);
        sqlx::query(
            r#"
            INSERT INTO message_vectors (message_id, embedding, dims, model)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(message_id) DO UPDATE SET
                embedding = excluded.embedding,
                dims = excluded.dims,
                model = excluded.model
            "#,
        )
        .bind(message_id)
        .bind(blob)
        .bind(vector.len() as i64)
        .bind(model)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Nearest-neighbour search over the stored vectors, ranked by
    /// descending cosine similarity. `k` is clamped to [`MAX_SEARCH_K`].
    pub async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let k = k.min(MAX_SEARCH_K);
        if k == 0 || query_vec.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT m.id, m.subject, m.sender, m.ts,
                   substr(m.body, 1, ?) AS excerpt,
                   v.embedding
            FROM message_vectors v
            JOIN messages m ON m.id = v.message_id
            "#,
        )
        .bind(EXCERPT_CHARS as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                let score = cosine_similarity(query_vec, &vec) as f64;
                SearchHit {
                    meta: row_meta(row),
                    excerpt: row.get("excerpt"),
                    score,
                }
            })
            .collect();

        // Sort: score desc, then timestamp desc, then id asc (deterministic)
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.meta.timestamp.cmp(&a.meta.timestamp))
                .then(a.meta.id.cmp(&b.meta.id))
        });
        hits.truncate(k);

        Ok(hits)
    }

    /// Most recently received indexed messages, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<MessageMeta>> {
        let rows = sqlx::query(
            "SELECT id, subject, sender, ts FROM messages ORDER BY ts DESC, id ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_meta).collect())
    }

    /// Number of indexed messages.
    pub async fn message_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Full body of one indexed message, if present.
    pub async fn message_body(&self, id: &str) -> Result<Option<String>> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(body)
    }
}

fn row_meta(row: &sqlx::sqlite::SqliteRow) -> MessageMeta {
    let ts: i64 = row.get("ts");
    MessageMeta {
        id: row.get("id"),
        subject: row.get("subject"),
        sender: row.get("sender"),
        timestamp: DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use chrono::TimeZone;

    async fn test_store() -> (tempfile::TempDir, RetrievalStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("pilot.sqlite");
        let options =
            sqlx::sqlite::SqliteConnectOptions::new().filename(&path).create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, RetrievalStore::new(pool))
    }

    fn message(id: &str, subject: &str, body: &str) -> Message {
        Message {
            id: id.to_string(),
            thread_id: None,
            sender: "alice@example.com".to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            labels: vec![],
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_keeps_latest_content() {
        let (_tmp, store) = test_store().await;

        let first = message("m1", "Quarterly plan", "first draft");
        store.upsert_message("me@example.com", &first).await.unwrap();

        let mut second = first.clone();
        second.body = "second draft".to_string();
        store.upsert_message("me@example.com", &second).await.unwrap();
        store.upsert_message("me@example.com", &second).await.unwrap();

        assert_eq!(store.message_count().await.unwrap(), 1);
        assert_eq!(
            store.message_body("m1").await.unwrap().as_deref(),
            Some("second draft")
        );
    }

    #[tokio::test]
    async fn unchanged_reupsert_is_skipped() {
        let (_tmp, store) = test_store().await;

        let msg = message("m1", "Quarterly plan", "first draft");
        assert!(store.upsert_message("me@example.com", &msg).await.unwrap());
        assert!(!store.upsert_message("me@example.com", &msg).await.unwrap());

        // any content change is written again
        let mut relabelled = msg.clone();
        relabelled.labels.push("IMPORTANT".to_string());
        assert!(store
            .upsert_message("me@example.com", &relabelled)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() {
        let (_tmp, store) = test_store().await;

        for (id, vec) in [
            ("m1", vec![1.0f32, 0.0, 0.0]),
            ("m2", vec![0.7, 0.7, 0.0]),
            ("m3", vec![0.0, 0.0, 1.0]),
        ] {
            store
                .upsert_message("me@example.com", &message(id, id, "body"))
                .await
                .unwrap();
            store.upsert_embedding(id, &vec, "test-model").await.unwrap();
        }

        let hits = store.search(&[1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].meta.id, "m1");
        assert_eq!(hits[1].meta.id, "m2");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn search_k_is_clamped() {
        let (_tmp, store) = test_store().await;
        store
            .upsert_message("me@example.com", &message("m1", "s", "b"))
            .await
            .unwrap();
        store
            .upsert_embedding("m1", &[1.0, 0.0], "test-model")
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 10_000).await.unwrap();
        assert_eq!(hits.len(), 1);

        let none = store.search(&[1.0, 0.0], 0).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn reupserted_embedding_replaces_previous() {
        let (_tmp, store) = test_store().await;
        store
            .upsert_message("me@example.com", &message("m1", "s", "b"))
            .await
            .unwrap();
        store
            .upsert_embedding("m1", &[1.0, 0.0], "test-model")
            .await
            .unwrap();
        store
            .upsert_embedding("m1", &[0.0, 1.0], "test-model")
            .await
            .unwrap();

        let hits = store.search(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn recent_orders_newest_first() {
        let (_tmp, store) = test_store().await;

        let mut older = message("old", "Old", "body");
        older.timestamp = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let newer = message("new", "New", "body");

        store.upsert_message("me@example.com", &older).await.unwrap();
        store.upsert_message("me@example.com", &newer).await.unwrap();

        let recent = store.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "new");
        assert_eq!(recent[1].id, "old");
    }
}
