//! Recipe adaptation via retrieval-augmented generation.
//!
//! Given a recipe and a completed appliance, retrieves the most relevant
//! manual excerpts and asks the generation model to rewrite the recipe's
//! steps for that appliance. Never errors for "could not adapt": an
//! unparsable model response degrades to the original steps with an
//! explanatory summary. The only failures surfaced to the caller are
//! input errors — unknown appliance or recipe, wrong owner, or an
//! appliance whose ingestion has not completed.

use serde::Deserialize;
use std::sync::Arc;

use crate::chunker::{chunk_text, ChunkOptions};
use crate::config::RetrievalConfig;
use crate::llm::{EmbeddingClient, GenerationClient};
use crate::models::{AdaptedRecipe, ProcessingStatus, Recipe, VectorQuery};
use crate::object_store::ObjectStore;
use crate::specs::strip_code_fences;
use crate::store::ApplianceStore;
use crate::vector::VectorIndex;

const SUMMARIZE_SYSTEM_PROMPT: &str = "Summarize the recipe steps below into a short list of \
core cooking actions: temperatures, durations, and techniques. One action per line, no \
commentary.";

const TAILOR_SYSTEM_PROMPT: &str = "You adapt recipe steps to a specific kitchen appliance \
using excerpts from its manual. Respond with strict JSON only: \
{\"tailored_steps\": [string], \"change_summary\": string}. Keep steps that need no change, \
adjust temperatures, durations, and settings to the appliance's modes, and say what changed.";

const DEGRADED_SUMMARY: &str =
    "Adaptation could not be completed; the original steps are returned unchanged.";

/// Caller input errors; everything else inside adaptation degrades
/// instead of failing.
#[derive(Debug)]
pub enum AdaptError {
    ApplianceNotFound,
    RecipeNotFound,
    /// Ingestion has not reached `COMPLETED` for this appliance.
    NotReady(ProcessingStatus),
    Internal(anyhow::Error),
}

impl std::fmt::Display for AdaptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdaptError::ApplianceNotFound => write!(f, "appliance not found"),
            AdaptError::RecipeNotFound => write!(f, "recipe not found"),
            AdaptError::NotReady(status) => {
                write!(f, "appliance manual is not ready (status: {})", status.as_str())
            }
            AdaptError::Internal(e) => write!(f, "adaptation failed: {}", e),
        }
    }
}

impl std::error::Error for AdaptError {}

impl From<anyhow::Error> for AdaptError {
    fn from(e: anyhow::Error) -> Self {
        AdaptError::Internal(e)
    }
}

pub struct AdaptationEngine {
    store: Arc<ApplianceStore>,
    objects: Arc<dyn ObjectStore>,
    index: Arc<dyn VectorIndex>,
    embedding: Arc<dyn EmbeddingClient>,
    generation: Arc<dyn GenerationClient>,
    retrieval: RetrievalConfig,
}

impl AdaptationEngine {
    pub fn new(
        store: Arc<ApplianceStore>,
        objects: Arc<dyn ObjectStore>,
        index: Arc<dyn VectorIndex>,
        embedding: Arc<dyn EmbeddingClient>,
        generation: Arc<dyn GenerationClient>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            objects,
            index,
            embedding,
            generation,
            retrieval,
        }
    }

    /// Tailor a recipe's steps to an appliance owned by the same caller.
    pub async fn adapt(
        &self,
        owner_id: &str,
        recipe_id: &str,
        appliance_id: &str,
    ) -> Result<AdaptedRecipe, AdaptError> {
        let appliance = self
            .store
            .get(owner_id, appliance_id)
            .await?
            .ok_or(AdaptError::ApplianceNotFound)?;
        if appliance.processing_status != ProcessingStatus::Completed {
            return Err(AdaptError::NotReady(appliance.processing_status));
        }

        let recipe = self
            .store
            .get_recipe(owner_id, recipe_id)
            .await?
            .ok_or(AdaptError::RecipeNotFound)?;

        // A compressed action list retrieves better than raw step prose
        let query_text = self.summarize_steps(&recipe).await;

        let excerpts = self
            .retrieve_excerpts(&appliance.id, owner_id, &query_text, &appliance)
            .await;

        let user_prompt = build_tailor_prompt(
            &recipe,
            appliance.agent_instructions.as_deref(),
            &excerpts,
        );

        let response = match self.generation.generate(TAILOR_SYSTEM_PROMPT, &user_prompt).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(appliance_id, error = %e, "tailoring call failed, degrading");
                return Ok(degraded(&recipe));
            }
        };

        match parse_adaptation_response(&response) {
            Some(adapted) => Ok(adapted),
            None => {
                tracing::warn!(appliance_id, "tailoring response unparsable, degrading");
                Ok(degraded(&recipe))
            }
        }
    }

    async fn summarize_steps(&self, recipe: &Recipe) -> String {
        let raw_steps = recipe.steps.join("\n");
        match self
            .generation
            .generate(SUMMARIZE_SYSTEM_PROMPT, &raw_steps)
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) => raw_steps,
            Err(e) => {
                tracing::debug!(error = %e, "step summarization failed, querying with raw steps");
                raw_steps
            }
        }
    }

    /// Vector query first; with no matches (e.g. a legacy ingestion that
    /// produced no per-chunk vectors), fall back to re-chunking the stored
    /// full text on the fly.
    async fn retrieve_excerpts(
        &self,
        appliance_id: &str,
        owner_id: &str,
        query_text: &str,
        appliance: &crate::models::Appliance,
    ) -> Vec<String> {
        let embedding = self.embedding.embed(query_text).await;
        if !embedding.is_empty() {
            match self
                .index
                .query(VectorQuery {
                    embedding,
                    top_k: self.retrieval.top_k,
                    appliance_id: appliance_id.to_string(),
                    owner_id: owner_id.to_string(),
                })
                .await
            {
                Ok(matches) if !matches.is_empty() => {
                    return matches.into_iter().map(|m| m.metadata.chunk_text).collect();
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(appliance_id, error = %e, "vector query failed, using text fallback");
                }
            }
        }

        let Some(text_key) = &appliance.extracted_text_key else {
            return Vec::new();
        };
        let text = match self.objects.get_text(text_key).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(appliance_id, error = %e, "extracted text unavailable for fallback");
                return Vec::new();
            }
        };

        let opts = ChunkOptions {
            target_chars: self.retrieval.fallback_chunk_chars,
            overlap_chars: self.retrieval.fallback_overlap_chars,
            max_chunks: self.retrieval.top_k,
        };
        chunk_text(&text, opts)
    }
}

fn degraded(recipe: &Recipe) -> AdaptedRecipe {
    AdaptedRecipe {
        tailored_steps: recipe.steps.clone(),
        change_summary: DEGRADED_SUMMARY.to_string(),
    }
}

fn build_tailor_prompt(
    recipe: &Recipe,
    instructions: Option<&str>,
    excerpts: &[String],
) -> String {
    let mut prompt = String::new();
    if let Some(instructions) = instructions {
        if !instructions.is_empty() {
            prompt.push_str("Appliance usage notes:\n");
            prompt.push_str(instructions);
            prompt.push_str("\n\n");
        }
    }
    if !excerpts.is_empty() {
        prompt.push_str("Manual excerpts:\n");
        for (i, excerpt) in excerpts.iter().enumerate() {
            prompt.push_str(&format!("[{}] {}\n", i + 1, excerpt));
        }
        prompt.push('\n');
    }
    prompt.push_str(&format!("Recipe: {}\n\nOriginal steps:\n", recipe.title));
    for (i, step) in recipe.steps.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, step));
    }
    prompt
}

/// Strict shape first, with key-variant aliases; `None` when the response
/// is not usable.
#[derive(Debug, Deserialize)]
struct TailorResponse {
    #[serde(alias = "tailoredSteps")]
    tailored_steps: Vec<String>,
    #[serde(default, alias = "changeSummary", alias = "summary")]
    change_summary: Option<String>,
}

pub fn parse_adaptation_response(response: &str) -> Option<AdaptedRecipe> {
    let body = strip_code_fences(response);
    let parsed: TailorResponse = serde_json::from_str(body).ok()?;
    if parsed.tailored_steps.is_empty() {
        return None;
    }
    Some(AdaptedRecipe {
        tailored_steps: parsed.tailored_steps,
        change_summary: parsed
            .change_summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Steps adapted to the appliance.".to_string()),
    })
}
