//! Text source resolution: one normalized text blob per ingestion job.
//!
//! Priority order:
//! 1. Caller-supplied text is used verbatim (trimmed) and skips all
//!    extraction, including the cost of OCR.
//! 2. Raw bytes come from the job payload or by fetching the manual URL
//!    (http/https only; other schemes are rejected before any fetch).
//!    Obtained bytes are written to object storage at the job's manual key
//!    before extraction, so the source survives later stage failures.
//! 3. A local, deterministic parse is accepted outright when it clears the
//!    minimum-length threshold — the free path is preferred whenever it
//!    clearly succeeded.
//! 4. Otherwise the remote vision model OCRs the same bytes, and the
//!    longer-by-quality-ratio result wins. Local parsing is free and OCR
//!    is billed; keep this ordering.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::extract::DocumentParser;
use crate::llm::GenerationClient;
use crate::models::IngestionJob;
use crate::object_store::ObjectStore;

const OCR_PROMPT: &str = "Transcribe all text from this appliance manual document. \
Preserve section headings and paragraph breaks. Output the text only, no commentary.";

const FETCH_TIMEOUT_SECS: u64 = 60;

/// Outcome of resolution: the normalized text plus whether raw manual
/// bytes were stored at the job's manual key.
#[derive(Debug)]
pub struct ResolvedText {
    pub text: String,
    pub manual_stored: bool,
}

pub struct TextSourceResolver {
    store: Arc<dyn ObjectStore>,
    parser: Arc<dyn DocumentParser>,
    generation: Arc<dyn GenerationClient>,
    http: reqwest::Client,
    min_local_chars: usize,
}

impl TextSourceResolver {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        parser: Arc<dyn DocumentParser>,
        generation: Arc<dyn GenerationClient>,
        min_local_chars: usize,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            store,
            parser,
            generation,
            http,
            min_local_chars,
        })
    }

    /// Resolve one job to normalized text, or fail with an extraction
    /// error.
    pub async fn resolve(&self, job: &IngestionJob) -> Result<ResolvedText> {
        // Caller-supplied text wins outright
        if let Some(text) = &job.extracted_text {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return Ok(ResolvedText {
                    text: trimmed.to_string(),
                    manual_stored: false,
                });
            }
        }

        let (bytes, content_type) = self.obtain_bytes(job).await?;

        // Durably store the source before extraction is attempted
        self.store
            .put(&job.manual_key, &bytes, &content_type)
            .await
            .context("failed to store raw manual bytes")?;

        let local = match self.parser.parse(&bytes, &content_type) {
            Ok(text) => {
                let trimmed = text.trim().to_string();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed)
                }
            }
            Err(e) => {
                tracing::info!(error = %e, "local extraction failed, considering OCR");
                None
            }
        };

        // Cheap path: accept a clearly successful local parse immediately
        if let Some(text) = &local {
            if text.chars().count() >= self.min_local_chars {
                return Ok(ResolvedText {
                    text: text.clone(),
                    manual_stored: true,
                });
            }
        }

        let ocr = match self
            .generation
            .generate_vision(OCR_PROMPT, &bytes, &content_type)
            .await
        {
            Ok(text) => {
                let trimmed = text.trim().to_string();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed)
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "OCR call failed");
                None
            }
        };

        match choose_extraction(local, ocr) {
            Some(text) => Ok(ResolvedText {
                text,
                manual_stored: true,
            }),
            None => bail!("manual text extraction failed: neither local parsing nor OCR produced text"),
        }
    }

    async fn obtain_bytes(&self, job: &IngestionJob) -> Result<(Vec<u8>, String)> {
        if let Some(payload) = &job.payload {
            if !payload.is_empty() {
                let content_type = job
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/pdf".to_string());
                return Ok((payload.clone(), content_type));
            }
        }

        let Some(url) = &job.manual_url else {
            bail!("ingestion job carries no text, payload, or manual URL");
        };
        validate_manual_url(url)?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to fetch manual from {}", url))?
            .error_for_status()
            .with_context(|| format!("manual fetch returned an error status for {}", url))?;

        let content_type = job.content_type.clone().unwrap_or_else(|| {
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
                .unwrap_or_else(|| "application/pdf".to_string())
        });

        let bytes = response.bytes().await?.to_vec();
        if bytes.is_empty() {
            bail!("manual fetch from {} returned an empty body", url);
        }
        Ok((bytes, content_type))
    }
}

/// Reject any manual URL whose scheme is not http/https, before fetching.
/// Keeps the fetcher from being pointed at internal resources (file:,
/// gopher:, cloud metadata endpoints behind custom schemes).
pub fn validate_manual_url(url: &str) -> Result<()> {
    let scheme = url.split("://").next().unwrap_or("");
    if url.contains("://")
        && (scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https"))
    {
        Ok(())
    } else {
        bail!("manual URL must use http or https: {}", url)
    }
}

/// Pick between the local parse and the OCR result.
///
/// An OCR result shorter than one quarter of an existing local result is
/// treated as a degenerated call (e.g. truncated response) and the local
/// result is kept; otherwise OCR wins. With only one result, that result
/// is used; with neither, extraction has failed.
pub fn choose_extraction(local: Option<String>, ocr: Option<String>) -> Option<String> {
    match (local, ocr) {
        (Some(l), Some(o)) => {
            if o.chars().count() * 4 < l.chars().count() {
                Some(l)
            } else {
                Some(o)
            }
        }
        (Some(l), None) => Some(l),
        (None, Some(o)) => Some(o),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_ocr_result_keeps_local() {
        let local = Some("l".repeat(1000));
        let ocr = Some("o".repeat(100));
        assert_eq!(choose_extraction(local.clone(), ocr), local);
    }

    #[test]
    fn comparable_ocr_result_wins() {
        let local = Some("l".repeat(1000));
        let ocr = Some("o".repeat(900));
        assert_eq!(choose_extraction(local, ocr.clone()), ocr);
    }

    #[test]
    fn exactly_one_quarter_goes_to_ocr() {
        let local = Some("l".repeat(1000));
        let ocr = Some("o".repeat(250));
        assert_eq!(choose_extraction(local, ocr.clone()), ocr);
    }

    #[test]
    fn single_sided_results_are_used() {
        assert_eq!(
            choose_extraction(Some("local".into()), None),
            Some("local".into())
        );
        assert_eq!(
            choose_extraction(None, Some("ocr".into())),
            Some("ocr".into())
        );
        assert_eq!(choose_extraction(None, None), None);
    }

    #[test]
    fn url_scheme_validation() {
        assert!(validate_manual_url("https://example.com/manual.pdf").is_ok());
        assert!(validate_manual_url("http://example.com/manual.pdf").is_ok());
        assert!(validate_manual_url("HTTPS://example.com/manual.pdf").is_ok());
        assert!(validate_manual_url("file:///etc/passwd").is_err());
        assert!(validate_manual_url("ftp://example.com/manual.pdf").is_err());
        assert!(validate_manual_url("example.com/manual.pdf").is_err());
    }
}
