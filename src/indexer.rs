//! Chunk embedding and vector index writes.
//!
//! Embeds each chunk with one call apiece — sequentially, bounding
//! concurrent load on the embedding service — and upserts the surviving
//! entries in one batch. Chunks that embed to an empty vector are skipped
//! rather than stored, guarding the index against failed embedding calls.

use anyhow::Result;
use std::sync::Arc;

use crate::llm::EmbeddingClient;
use crate::models::{chunk_vector_id, VectorEntry, VectorMetadata};
use crate::vector::VectorIndex;

pub struct ChunkIndexer {
    embedding: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    /// Excerpt length stored in metadata for query-time context assembly.
    excerpt_chars: usize,
}

impl ChunkIndexer {
    pub fn new(
        embedding: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        excerpt_chars: usize,
    ) -> Self {
        Self {
            embedding,
            index,
            excerpt_chars,
        }
    }

    /// Embed and upsert all chunks for one appliance.
    ///
    /// Returns the count of vectors actually written — the authoritative
    /// value for the appliance's `vector_chunk_count`.
    pub async fn index_chunks(
        &self,
        appliance_id: &str,
        owner_id: &str,
        chunks: &[String],
    ) -> Result<usize> {
        let mut entries = Vec::with_capacity(chunks.len());

        for (i, chunk) in chunks.iter().enumerate() {
            let embedding = self.embedding.embed(chunk).await;
            if embedding.is_empty() {
                tracing::warn!(
                    appliance_id,
                    chunk_index = i,
                    "chunk embedded to empty vector, skipping"
                );
                continue;
            }
            entries.push(VectorEntry {
                id: chunk_vector_id(appliance_id, i),
                embedding,
                metadata: VectorMetadata {
                    appliance_id: appliance_id.to_string(),
                    owner_id: owner_id.to_string(),
                    chunk_index: i as i64,
                    chunk_text: head_chars(chunk, self.excerpt_chars).to_string(),
                },
            });
        }

        let written = entries.len();
        if written > 0 {
            self.index.upsert(entries).await?;
        }
        Ok(written)
    }
}

fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
