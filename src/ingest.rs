//! Ingestion coordination for one appliance manual.
//!
//! Stages run strictly in sequence: resolve text → persist text → extract
//! specs → synthesize instructions → chunk → embed → batch-upsert vectors
//! → final status write. Spec extraction and instruction synthesis are
//! best-effort; everything else failing moves the record to `FAILED`.
//!
//! No lock is held across stages. Correctness relies on each stage being
//! idempotent with respect to its own output key: the same appliance id
//! always maps to the same object-storage keys and the same deterministic
//! chunk ids, so a re-run overwrites rather than duplicates.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::chunker::{chunk_text, ChunkOptions};
use crate::indexer::ChunkIndexer;
use crate::llm::GenerationClient;
use crate::models::IngestionJob;
use crate::object_store::ObjectStore;
use crate::resolver::TextSourceResolver;
use crate::specs;
use crate::store::{ApplianceStore, CompletionUpdate};

/// Object-storage key for an appliance's original manual bytes.
pub fn manual_object_key(appliance_id: &str) -> String {
    format!("manuals/{}/original", appliance_id)
}

/// Object-storage key for an appliance's normalized extracted text.
pub fn extracted_text_object_key(appliance_id: &str) -> String {
    format!("manuals/{}/extracted.txt", appliance_id)
}

pub struct IngestionCoordinator {
    store: Arc<ApplianceStore>,
    objects: Arc<dyn ObjectStore>,
    resolver: TextSourceResolver,
    indexer: ChunkIndexer,
    generation: Arc<dyn GenerationClient>,
    chunking: ChunkOptions,
}

impl IngestionCoordinator {
    pub fn new(
        store: Arc<ApplianceStore>,
        objects: Arc<dyn ObjectStore>,
        resolver: TextSourceResolver,
        indexer: ChunkIndexer,
        generation: Arc<dyn GenerationClient>,
        chunking: ChunkOptions,
    ) -> Self {
        Self {
            store,
            objects,
            resolver,
            indexer,
            generation,
            chunking,
        }
    }

    /// Run one ingestion job to completion or failure.
    ///
    /// Transitions the appliance `QUEUED → PROCESSING` before any
    /// extraction work, then to `COMPLETED` or `FAILED`. The returned
    /// result reports the job outcome to the dispatcher; all persistence
    /// has already happened by the time it is returned.
    pub async fn run(&self, job: IngestionJob) -> Result<()> {
        let appliance_id = job.appliance_id.clone();
        tracing::info!(appliance_id, owner_id = %job.owner_id, "ingestion started");

        self.store
            .mark_processing(&appliance_id)
            .await
            .context("failed to mark appliance PROCESSING")?;

        match self.run_stages(&job).await {
            Ok(chunk_count) => {
                tracing::info!(appliance_id, chunk_count, "ingestion completed");
                Ok(())
            }
            Err(e) => {
                tracing::error!(appliance_id, error = %e, "ingestion failed");
                if let Err(mark_err) = self.store.mark_failed(&appliance_id).await {
                    tracing::error!(appliance_id, error = %mark_err, "failed to mark appliance FAILED");
                }
                Err(e)
            }
        }
    }

    async fn run_stages(&self, job: &IngestionJob) -> Result<usize> {
        let resolved = self.resolver.resolve(job).await?;
        // Text-only jobs store nothing at the manual key; don't persist a
        // dangling handle
        let manual_key = resolved.manual_stored.then(|| job.manual_key.clone());
        let text = resolved.text;

        let text_key = extracted_text_object_key(&job.appliance_id);
        self.objects
            .put(&text_key, text.as_bytes(), "text/plain")
            .await
            .context("failed to persist extracted text")?;

        // Best-effort enrichment; never blocks chunk indexing or
        // completion
        let mut extracted = specs::extract_specs(self.generation.as_ref(), &text).await;
        let instructions = match &extracted {
            Some(s) => {
                let summary =
                    specs::synthesize_instructions(self.generation.as_ref(), s, None).await;
                if summary.is_empty() {
                    None
                } else {
                    Some(summary)
                }
            }
            None => None,
        };

        let chunks = chunk_text(&text, self.chunking);
        let written = self
            .indexer
            .index_chunks(&job.appliance_id, &job.owner_id, &chunks)
            .await?;

        let mut specs_record = extracted.take().unwrap_or_default();
        let discovered_brand = specs_record.brand.clone();
        let discovered_model = specs_record.model.clone();
        // The count persisted here drives later deletion; it must match
        // what was just written, atomically with this completion update.
        specs_record.vector_chunk_count = written;

        self.store
            .complete(
                &job.appliance_id,
                CompletionUpdate {
                    extracted_text_key: text_key,
                    manual_key,
                    specs: specs_record,
                    agent_instructions: instructions,
                    discovered_brand,
                    discovered_model,
                },
            )
            .await
            .context("failed to persist completion update")?;

        Ok(written)
    }
}
