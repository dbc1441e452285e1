//! Structured spec extraction from manual text.
//!
//! One generation call derives brand/model/capacity/wattage/features from
//! the full normalized text; a second synthesizes a short usage summary.
//! Both are best-effort enrichment: any call or parse failure yields a
//! `None` spec or an empty summary, never a pipeline error.
//!
//! Model output is parsed as a tagged outcome: a strict schema parse
//! first, then an explicit lenient pass (code-fence stripping, key-variant
//! and scalar coercion), then `None`. No silent coercion in the strict
//! path.

use serde::Deserialize;

use crate::llm::GenerationClient;
use crate::models::ApplianceSpecs;

/// Manual text beyond this many characters is not sent to the model.
const SPEC_PROMPT_MAX_CHARS: usize = 12_000;

const SPEC_SYSTEM_PROMPT: &str = "You extract appliance metadata from manual text. \
Respond with strict JSON only, no prose, with keys: \
brand (string|null), model (string|null), capacity (string|null), \
wattage (string|null), features (array of short strings).";

const INSTRUCTIONS_SYSTEM_PROMPT: &str = "You write a short usage summary for a kitchen \
appliance, in 3-5 sentences, covering its key modes, temperature/wattage behavior, and \
anything a cook must know before following a recipe on it. Plain text only.";

/// Derive structured specs from manual text. Returns `None` when the call
/// fails or the output cannot be parsed even leniently.
pub async fn extract_specs(
    generation: &dyn GenerationClient,
    manual_text: &str,
) -> Option<ApplianceSpecs> {
    let excerpt = head_chars(manual_text, SPEC_PROMPT_MAX_CHARS);
    let response = match generation.generate(SPEC_SYSTEM_PROMPT, excerpt).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "spec extraction call failed");
            return None;
        }
    };
    parse_spec_response(&response)
}

/// Synthesize a short natural-language usage summary from the extracted
/// spec plus any known user preferences. Falls back to an empty string on
/// any failure; the only contract is "non-empty string, trimmed" on
/// success.
pub async fn synthesize_instructions(
    generation: &dyn GenerationClient,
    specs: &ApplianceSpecs,
    preferences: Option<&str>,
) -> String {
    let spec_json = match serde_json::to_string(specs) {
        Ok(j) => j,
        Err(_) => return String::new(),
    };
    let user = match preferences {
        Some(prefs) => format!(
            "Appliance specs:\n{}\n\nUser preferences to keep in mind:\n{}",
            spec_json, prefs
        ),
        None => format!("Appliance specs:\n{}", spec_json),
    };
    match generation.generate(INSTRUCTIONS_SYSTEM_PROMPT, &user).await {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "instruction synthesis call failed");
            String::new()
        }
    }
}

/// Strict shape the model is asked for. Aliases accept the camelCase
/// variants some models emit for the feature list.
#[derive(Debug, Deserialize)]
struct StrictSpec {
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    capacity: Option<String>,
    #[serde(default)]
    wattage: Option<String>,
    #[serde(default, alias = "feature_list", alias = "featureList")]
    features: Vec<String>,
}

/// Parse a generation response into specs: strict parse, then lenient.
pub fn parse_spec_response(response: &str) -> Option<ApplianceSpecs> {
    let body = strip_code_fences(response);

    if let Ok(strict) = serde_json::from_str::<StrictSpec>(body) {
        return Some(ApplianceSpecs {
            brand: none_if_blank(strict.brand),
            model: none_if_blank(strict.model),
            capacity: none_if_blank(strict.capacity),
            wattage: none_if_blank(strict.wattage),
            features: strict.features,
            vector_chunk_count: 0,
        });
    }

    // Lenient pass: scalar fields may come back as numbers, the feature
    // list under a variant key
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let obj = value.as_object()?;

    let features = ["features", "feature_list", "featureList"]
        .iter()
        .find_map(|k| obj.get(*k))
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| match v {
                    serde_json::Value::String(s) => Some(s.clone()),
                    other => other.as_i64().map(|n| n.to_string()),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ApplianceSpecs {
        brand: scalar_as_string(obj.get("brand")),
        model: scalar_as_string(obj.get("model")),
        capacity: scalar_as_string(obj.get("capacity")),
        wattage: scalar_as_string(obj.get("wattage")),
        features,
        vector_chunk_count: 0,
    })
}

fn scalar_as_string(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn none_if_blank(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Strip a Markdown code fence (``` or ```json) wrapping the payload.
pub fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string on the opening fence line
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_json_parses() {
        let spec = parse_spec_response(
            r#"{"brand":"Breville","model":"BOV900","capacity":"1 cu ft","wattage":"1800W","features":["convection","air fry"]}"#,
        )
        .unwrap();
        assert_eq!(spec.brand.as_deref(), Some("Breville"));
        assert_eq!(spec.features, vec!["convection", "air fry"]);
    }

    #[test]
    fn code_fenced_json_is_unwrapped() {
        let spec = parse_spec_response(
            "```json\n{\"brand\":\"Ninja\",\"features\":[\"pressure cook\"]}\n```",
        )
        .unwrap();
        assert_eq!(spec.brand.as_deref(), Some("Ninja"));
        assert_eq!(spec.features, vec!["pressure cook"]);
    }

    #[test]
    fn camel_case_feature_key_is_accepted() {
        let spec =
            parse_spec_response(r#"{"brand":"Instant","featureList":["saute","slow cook"]}"#)
                .unwrap();
        assert_eq!(spec.features, vec!["saute", "slow cook"]);
    }

    #[test]
    fn snake_case_feature_key_is_accepted() {
        let spec = parse_spec_response(r#"{"feature_list":["steam"]}"#).unwrap();
        assert_eq!(spec.features, vec!["steam"]);
    }

    #[test]
    fn numeric_wattage_is_coerced_in_lenient_pass() {
        let spec = parse_spec_response(r#"{"brand":"Anova","wattage":1200,"features":[]}"#).unwrap();
        assert_eq!(spec.wattage.as_deref(), Some("1200"));
    }

    #[test]
    fn unparsable_output_yields_none() {
        assert!(parse_spec_response("I could not find any specs, sorry!").is_none());
        assert!(parse_spec_response("").is_none());
    }

    #[test]
    fn blank_strings_become_none() {
        let spec = parse_spec_response(r#"{"brand":"  ","model":"X-200","features":[]}"#).unwrap();
        assert_eq!(spec.brand, None);
        assert_eq!(spec.model.as_deref(), Some("X-200"));
    }

    #[test]
    fn fence_without_info_string() {
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }
}
