//! Vector index abstraction and SQLite-backed implementation.
//!
//! The index stores one row per manual chunk with the embedding encoded as
//! a little-endian f32 BLOB. Queries are brute-force cosine similarity
//! over the rows matching the appliance/owner filter — manuals cap out at
//! a few dozen chunks, so a scan is exact and fast enough.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::models::{VectorEntry, VectorMatch, VectorMetadata, VectorQuery};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite entries by id, as one batch.
    async fn upsert(&self, entries: Vec<VectorEntry>) -> Result<()>;

    /// Top-k nearest neighbors filtered to the query's appliance and owner.
    async fn query(&self, query: VectorQuery) -> Result<Vec<VectorMatch>>;

    /// Remove entries by id; missing ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<()>;
}

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, entries: Vec<VectorEntry>) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for entry in &entries {
            let blob = vec_to_blob(&entry.embedding);
            let mut hasher = Sha256::new();
            hasher.update(entry.metadata.chunk_text.as_bytes());
            let content_hash = format!("{:x}", hasher.finalize());

            sqlx::query(
                r#"
                INSERT INTO manual_vectors (id, appliance_id, owner_id, chunk_index, chunk_text, embedding, dims, content_hash, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    appliance_id = excluded.appliance_id,
                    owner_id = excluded.owner_id,
                    chunk_index = excluded.chunk_index,
                    chunk_text = excluded.chunk_text,
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    content_hash = excluded.content_hash,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&entry.id)
            .bind(&entry.metadata.appliance_id)
            .bind(&entry.metadata.owner_id)
            .bind(entry.metadata.chunk_index)
            .bind(&entry.metadata.chunk_text)
            .bind(&blob)
            .bind(entry.embedding.len() as i64)
            .bind(&content_hash)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, query: VectorQuery) -> Result<Vec<VectorMatch>> {
        let rows = sqlx::query(
            r#"
            SELECT id, appliance_id, owner_id, chunk_index, chunk_text, embedding
            FROM manual_vectors
            WHERE appliance_id = ? AND owner_id = ?
            "#,
        )
        .bind(&query.appliance_id)
        .bind(&query.owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut matches: Vec<VectorMatch> = rows
            .into_iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let embedding = blob_to_vec(&blob);
                VectorMatch {
                    id: row.get("id"),
                    score: cosine_similarity(&query.embedding, &embedding),
                    metadata: VectorMetadata {
                        appliance_id: row.get("appliance_id"),
                        owner_id: row.get("owner_id"),
                        chunk_index: row.get("chunk_index"),
                        chunk_text: row.get("chunk_text"),
                    },
                }
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(query.top_k);
        Ok(matches)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM manual_vectors WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched
/// lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
