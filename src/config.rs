use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Root directory for the filesystem object store holding raw manuals and
/// extracted text.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in characters for ingestion-time chunking.
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
    /// Characters of the previous chunk repeated at the start of the next.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    /// Hard cap on chunks per manual, bounding embedding cost.
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: default_target_chars(),
            overlap_chars: default_overlap_chars(),
            max_chunks: default_max_chunks(),
        }
    }
}

fn default_target_chars() -> usize {
    1200
}
fn default_overlap_chars() -> usize {
    200
}
fn default_max_chunks() -> usize {
    40
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Matches requested from the vector index per adaptation.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Chunk size for the ad-hoc re-chunking fallback path.
    #[serde(default = "default_fallback_chunk_chars")]
    pub fallback_chunk_chars: usize,
    #[serde(default = "default_fallback_overlap_chars")]
    pub fallback_overlap_chars: usize,
    /// Excerpt length stored in vector metadata for context assembly.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            fallback_chunk_chars: default_fallback_chunk_chars(),
            fallback_overlap_chars: default_fallback_overlap_chars(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_fallback_chunk_chars() -> usize {
    800
}
fn default_fallback_overlap_chars() -> usize {
    100
}
fn default_excerpt_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Minimum characters for a local parse to be accepted without OCR.
    #[serde(default = "default_min_local_chars")]
    pub min_local_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_local_chars: default_min_local_chars(),
        }
    }
}

fn default_min_local_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            base_url: default_base_url(),
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Model used for OCR of manual images/PDF bytes; defaults to `model`.
    #[serde(default)]
    pub vision_model: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            vision_model: None,
            base_url: default_base_url(),
            max_retries: 5,
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    /// Ingestion worker count.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Queued-but-unstarted job capacity; submits beyond this are rejected.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

fn default_workers() -> usize {
    2
}
fn default_queue_depth() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.target_chars == 0 {
        anyhow::bail!("chunking.target_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.target_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.target_chars");
    }
    if config.chunking.max_chunks == 0 {
        anyhow::bail!("chunking.max_chunks must be > 0");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be > 0");
    }
    if config.jobs.workers == 0 {
        anyhow::bail!("jobs.workers must be > 0");
    }
    if config.jobs.queue_depth == 0 {
        anyhow::bail!("jobs.queue_depth must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.generation.is_enabled() && config.generation.model.is_none() {
        anyhow::bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let f = write_config(
            r#"
[db]
path = "/tmp/apilot.sqlite"

[storage]
root = "/tmp/apilot-store"

[server]
bind = "127.0.0.1:7410"
"#,
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.chunking.target_chars, 1200);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.chunking.max_chunks, 40);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.extraction.min_local_chars, 200);
        assert!(!config.embedding.is_enabled());
        assert!(!config.generation.is_enabled());
    }

    #[test]
    fn enabled_embedding_requires_model_and_dims() {
        let f = write_config(
            r#"
[db]
path = "/tmp/apilot.sqlite"

[storage]
root = "/tmp/apilot-store"

[server]
bind = "127.0.0.1:7410"

[embedding]
provider = "openai"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn overlap_must_be_smaller_than_target() {
        let f = write_config(
            r#"
[db]
path = "/tmp/apilot.sqlite"

[storage]
root = "/tmp/apilot-store"

[server]
bind = "127.0.0.1:7410"

[chunking]
target_chars = 100
overlap_chars = 100
"#,
        );
        assert!(load_config(f.path()).is_err());
    }
}
