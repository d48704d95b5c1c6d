//! Structured criteria extraction via the completion service.
//!
//! Hallucination mitigation:
//!   - The prompt instructs the model to cite the source page for every
//!     criterion, using the page markers in the transcript.
//!   - Any criterion without a source page is flagged as unverified.
//!   - One malformed criterion is skipped with a warning; it never takes the
//!     whole batch down.
//!
//! Retry policy: malformed output and transient transport failures are both
//! retried with bounded exponential backoff. An invalid-request rejection is
//! never retried: the same input cannot succeed a second time.

use crate::config::ScreenConfig;
use crate::error::{CompletionError, ScreenError};
use crate::llm::{backoff_delay, strip_code_fences, CompletionClient};
use crate::model::{
    CriterionType, EligibilityCriterion, ExtractedCriteria, ExtractionMetadata, LocateMethod,
    PageText, SectionLocation,
};
use crate::prompts;
use serde::Deserialize;
use tracing::{error, info, warn};

/// Extract structured eligibility criteria from the located section pages.
///
/// Retries up to `config.max_attempts` times. Fatal outcomes:
/// [`ScreenError::CompletionRejected`] (invalid request, immediately),
/// [`ScreenError::MalformedCompletion`] or [`ScreenError::CompletionExhausted`]
/// (budget exhausted on parse and transport failures respectively).
pub async fn extract_criteria(
    client: &dyn CompletionClient,
    config: &ScreenConfig,
    location: &SectionLocation,
    section_pages: &[&PageText],
) -> Result<ExtractedCriteria, ScreenError> {
    let transcript = prompts::build_section_transcript(section_pages);
    let prompt = prompts::build_extraction_prompt(&transcript);
    info!(
        model = client.model_id(),
        pages = section_pages.len(),
        chars = transcript.chars().count(),
        "extracting criteria"
    );

    enum Failure {
        Transport(String),
        Parse(String),
    }

    let mut last_failure: Option<Failure> = None;

    for attempt in 1..=config.max_attempts {
        if attempt > 1 {
            tokio::time::sleep(backoff_delay(
                attempt - 1,
                config.retry_base_secs,
                config.retry_cap_secs,
            ))
            .await;
        }

        let raw = match client
            .complete(prompts::EXTRACTION_SYSTEM, &prompt, config.max_tokens)
            .await
        {
            Ok(raw) => raw,
            Err(CompletionError::InvalidRequest(detail)) => {
                error!(error = %detail, "extraction request rejected");
                return Err(ScreenError::CompletionRejected(detail));
            }
            Err(CompletionError::Transient(detail)) => {
                warn!(attempt, error = %detail, "extraction attempt failed");
                last_failure = Some(Failure::Transport(detail));
                continue;
            }
        };

        match parse_response(&raw, client.model_id(), location) {
            Ok(extracted) => {
                info!(
                    total = extracted.criteria.len(),
                    inclusion = extracted.inclusion_criteria().len(),
                    exclusion = extracted.exclusion_criteria().len(),
                    warnings = extracted.metadata.warnings.len(),
                    "criteria extracted"
                );
                return Ok(extracted);
            }
            Err(detail) => {
                warn!(attempt, error = %detail, "extraction output unparsable");
                last_failure = Some(Failure::Parse(detail));
            }
        }
    }

    let attempts = config.max_attempts;
    match last_failure {
        Some(Failure::Parse(detail)) => Err(ScreenError::MalformedCompletion { attempts, detail }),
        Some(Failure::Transport(detail)) => {
            Err(ScreenError::CompletionExhausted { attempts, detail })
        }
        // max_attempts >= 1, so the loop ran at least once
        None => Err(ScreenError::Internal("retry loop did not run".into())),
    }
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawCriteria {
    #[serde(default)]
    protocol_title: Option<String>,
    #[serde(default)]
    sponsor: Option<String>,
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    therapeutic_area: Option<String>,
    #[serde(default)]
    criteria: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawCriterion {
    #[serde(default)]
    id: Option<String>,
    #[serde(default = "default_criterion_type")]
    criterion_type: CriterionType,
    #[serde(default)]
    text: String,
    #[serde(default)]
    source_page: Option<usize>,
    #[serde(default)]
    source_section: Option<String>,
    #[serde(default)]
    has_temporal_condition: bool,
    #[serde(default)]
    has_numeric_threshold: bool,
    #[serde(default)]
    has_conditional_logic: bool,
    #[serde(default)]
    is_ambiguous: bool,
    #[serde(default)]
    notes: String,
}

fn default_criterion_type() -> CriterionType {
    CriterionType::Exclusion
}

/// Parse one completion response into [`ExtractedCriteria`].
///
/// The error string is the retryable "malformed output" signal; individual
/// bad criteria degrade to warnings instead.
fn parse_response(
    raw: &str,
    model_id: &str,
    location: &SectionLocation,
) -> Result<ExtractedCriteria, String> {
    let body = strip_code_fences(raw);
    let data: RawCriteria = serde_json::from_str(body).map_err(|e| {
        let head: String = body.chars().take(500).collect();
        format!("invalid JSON: {e}; raw: {head}")
    })?;

    let mut criteria: Vec<EligibilityCriterion> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    for (i, value) in data.criteria.into_iter().enumerate() {
        let raw_criterion: RawCriterion = match serde_json::from_value(value) {
            Ok(c) => c,
            Err(e) => {
                warnings.push(format!("Skipped malformed criterion #{i}: {e}"));
                continue;
            }
        };
        let id = raw_criterion
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("crit_{i:03}"));
        if raw_criterion.source_page.is_none() {
            warnings.push(format!(
                "Criterion {id} has no source_page; treat as unverified."
            ));
        }
        criteria.push(EligibilityCriterion {
            id,
            criterion_type: raw_criterion.criterion_type,
            text: raw_criterion.text,
            source_page: raw_criterion.source_page,
            source_section: raw_criterion.source_section,
            disqualification_power: Default::default(),
            has_temporal_condition: raw_criterion.has_temporal_condition,
            has_numeric_threshold: raw_criterion.has_numeric_threshold,
            has_conditional_logic: raw_criterion.has_conditional_logic,
            is_ambiguous: raw_criterion.is_ambiguous,
            notes: raw_criterion.notes,
        });
    }

    let penalty = (0.5 * warnings.len() as f32 / criteria.len().max(1) as f32).min(0.5);
    let metadata = ExtractionMetadata {
        model_used: model_id.to_string(),
        protocol_version: None,
        extraction_confidence: 1.0 - penalty,
        section_found: location.method != LocateMethod::FullDocFallback,
        section_name: location.section_name.clone(),
        warnings,
    };

    Ok(ExtractedCriteria {
        protocol_title: data.protocol_title,
        sponsor: data.sponsor,
        phase: data.phase,
        therapeutic_area: data.therapeutic_area,
        criteria,
        top_disqualifiers: Vec::new(),
        metadata,
    })
}
