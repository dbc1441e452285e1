//! Remote model clients: embedding and generation.
//!
//! Both capabilities are external providers reached over an RPC-style
//! HTTP call; the pipeline never runs a model itself. Concrete
//! implementations target OpenAI-compatible endpoints
//! (`/v1/embeddings`, `/v1/chat/completions`), with `disabled` variants
//! for configs without credentials.
//!
//! # Retry Strategy
//!
//! Transient errors use exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;

use crate::config::{EmbeddingConfig, GenerationConfig};

/// Embedding capability consumed by the indexer and the adaptation engine.
///
/// Returns an empty vector on failure rather than an error: a chunk that
/// fails to embed is skipped, never stored, and never fails the job.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Vec<f32>;
}

/// Generation capability: plain text calls plus a vision variant used for
/// OCR of manual bytes. Responses are free text that callers must parse
/// defensively.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, system: &str, user: &str) -> Result<String>;

    /// OCR the given document bytes with the vision model. The bytes are
    /// passed as one base64 data URL; page handling is the provider's
    /// concern.
    async fn generate_vision(&self, prompt: &str, bytes: &[u8], content_type: &str)
        -> Result<String>;
}

// ============ Disabled providers ============

/// No-op embedding client for configs without a provider. Always returns
/// an empty vector, which downstream code treats as a failed embedding.
pub struct DisabledEmbeddingClient;

#[async_trait]
impl EmbeddingClient for DisabledEmbeddingClient {
    async fn embed(&self, _text: &str) -> Vec<f32> {
        Vec::new()
    }
}

/// No-op generation client; every call errors.
pub struct DisabledGenerationClient;

#[async_trait]
impl GenerationClient for DisabledGenerationClient {
    async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
        bail!("Generation provider is disabled")
    }

    async fn generate_vision(
        &self,
        _prompt: &str,
        _bytes: &[u8],
        _content_type: &str,
    ) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

// ============ OpenAI-compatible providers ============

pub struct OpenAiEmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    /// Expected vector length from config; responses that disagree are
    /// rejected rather than stored.
    dims: Option<usize>,
    api_key: String,
    max_retries: u32,
}

impl OpenAiEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model,
            dims: config.dims,
            api_key,
            max_retries: config.max_retries,
        })
    }

    async fn try_embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let url = format!("{}/v1/embeddings", self.base_url);
        let json = post_with_retry(&self.http, &url, &self.api_key, &body, self.max_retries).await?;

        let embedding = json
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|a| a.first())
            .and_then(|item| item.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data[0].embedding"))?;

        check_dims(
            self.dims,
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        )
    }
}

/// Reject an embedding whose length disagrees with the configured dims; a
/// mismatched vector would silently score 0.0 against every stored entry.
fn check_dims(expected: Option<usize>, embedding: Vec<f32>) -> Result<Vec<f32>> {
    if let Some(dims) = expected {
        if embedding.len() != dims {
            bail!("embedding has {} dims, expected {}", embedding.len(), dims);
        }
    }
    Ok(embedding)
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, text: &str) -> Vec<f32> {
        match self.try_embed(text).await {
            Ok(vec) => vec,
            Err(e) => {
                tracing::warn!(error = %e, "embedding call failed, returning empty vector");
                Vec::new()
            }
        }
    }
}

pub struct OpenAiGenerationClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    vision_model: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiGenerationClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let vision_model = config.vision_model.clone().unwrap_or_else(|| model.clone());
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model,
            vision_model,
            api_key,
            max_retries: config.max_retries,
        })
    }

    async fn chat(&self, body: serde_json::Value) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let json = post_with_retry(&self.http, &url, &self.api_key, &body, self.max_retries).await?;
        let content = json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))?;
        Ok(content.to_string())
    }
}

#[async_trait]
impl GenerationClient for OpenAiGenerationClient {
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        self.chat(serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        }))
        .await
    }

    async fn generate_vision(
        &self,
        prompt: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let data_url = format!("data:{};base64,{}", content_type, encoded);
        self.chat(serde_json::json!({
            "model": self.vision_model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": data_url } },
                ],
            }],
        }))
        .await
    }
}

/// POST a JSON body with the retry table described in the module docs.
async fn post_with_retry(
    http: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = http
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("API error {}: {}", status, body_text));
                    continue;
                }

                // Client error (not 429) — don't retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("request failed after retries")))
}

/// Instantiate the configured embedding client.
pub fn create_embedding_client(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbeddingClient)),
        "openai" => Ok(Box::new(OpenAiEmbeddingClient::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Instantiate the configured generation client.
pub fn create_generation_client(config: &GenerationConfig) -> Result<Box<dyn GenerationClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerationClient)),
        "openai" => Ok(Box::new(OpenAiGenerationClient::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
