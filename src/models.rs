//! Core data models for the appliance manual knowledge pipeline.
//!
//! These types represent the appliances, ingestion jobs, and vector entries
//! that flow through ingestion and recipe adaptation.

use serde::{Deserialize, Serialize};

/// Lifecycle of one appliance's manual ingestion.
///
/// `Queued` is the only initial state; `Completed` and `Failed` are
/// terminal. Re-ingestion re-runs the full pipeline under the same id and
/// walks the machine again from `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Queued => "QUEUED",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Completed => "COMPLETED",
            ProcessingStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(ProcessingStatus::Queued),
            "PROCESSING" => Some(ProcessingStatus::Processing),
            "COMPLETED" => Some(ProcessingStatus::Completed),
            "FAILED" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }
}

/// Structured metadata extracted from a manual by the spec extractor.
///
/// `vector_chunk_count` records how many vector entries were written for
/// this appliance and is the authoritative input to deletion: removing an
/// appliance enumerates ids `0..vector_chunk_count`. A re-ingestion that
/// changes the chunk count must persist the new count together with the
/// vector upsert. Known gap: if a re-ingestion shrinks the count, trailing
/// ids from the prior run are not cleaned up until the appliance itself is
/// deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplianceSpecs {
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub capacity: Option<String>,
    #[serde(default)]
    pub wattage: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub vector_chunk_count: usize,
}

/// Persisted appliance record, owned by one user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Appliance {
    pub id: String,
    pub owner_id: String,
    pub nickname: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    /// Object-storage key of the original manual bytes, if any were stored.
    pub manual_key: Option<String>,
    /// Object-storage key of the normalized extracted text, if persisted.
    pub extracted_text_key: Option<String>,
    pub specs: Option<ApplianceSpecs>,
    /// Short natural-language usage summary synthesized from the specs.
    pub agent_instructions: Option<String>,
    pub processing_status: ProcessingStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Ephemeral work order for one manual ingestion.
///
/// Not persisted beyond the fields the coordinator copies into the
/// appliance record.
#[derive(Debug, Clone)]
pub struct IngestionJob {
    pub owner_id: String,
    pub appliance_id: String,
    /// Target object-storage key, computed before the job runs.
    pub manual_key: String,
    pub manual_url: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub content_type: Option<String>,
    /// Caller-supplied pre-extracted text; skips all extraction when set.
    pub extracted_text: Option<String>,
    pub nickname: Option<String>,
}

/// Metadata stored with every vector entry; used for filtered retrieval
/// and for context assembly at query time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub appliance_id: String,
    pub owner_id: String,
    pub chunk_index: i64,
    /// Truncated excerpt of the chunk, not the full chunk text.
    pub chunk_text: String,
}

/// One entry in the vector index.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// A nearest-neighbor query, always scoped to one appliance and owner.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub embedding: Vec<f32>,
    pub top_k: usize,
    pub appliance_id: String,
    pub owner_id: String,
}

/// A match returned from the vector index.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}

/// Minimal recipe read model consumed by the adaptation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub steps: Vec<String>,
}

/// Result of tailoring a recipe to an appliance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptedRecipe {
    pub tailored_steps: Vec<String>,
    pub change_summary: String,
}

/// Deterministic vector id for one chunk of one appliance's manual.
///
/// Re-ingesting the same appliance overwrites the same id range instead of
/// duplicating entries.
pub fn chunk_vector_id(appliance_id: &str, chunk_index: usize) -> String {
    format!("appliance:{}:chunk:{}", appliance_id, chunk_index)
}

/// Id shape written by the pre-chunking ingestion path; deletion falls back
/// to this single id when no chunk count was recorded.
pub fn legacy_vector_id(appliance_id: &str) -> String {
    format!("appliance:{}", appliance_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            ProcessingStatus::Queued,
            ProcessingStatus::Processing,
            ProcessingStatus::Completed,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(ProcessingStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ProcessingStatus::parse("RUNNING"), None);
    }

    #[test]
    fn chunk_ids_are_deterministic() {
        assert_eq!(chunk_vector_id("a1", 0), "appliance:a1:chunk:0");
        assert_eq!(chunk_vector_id("a1", 39), "appliance:a1:chunk:39");
    }
}
