//! Patient pre-screening against the ranked disqualifiers.
//!
//! The screener is deliberately infallible: a screening caller needs a
//! decision, and the conservative decision is always available. Every failure
//! mode (no criteria, no client, transport exhaustion, unparsable output,
//! low confidence) degrades to `Escalate` with a reason, never to an error.
//!
//! The confidence floor is asymmetric on purpose: a low-confidence
//! "disqualified" stands (a human will see the cited criteria either way),
//! while a low-confidence "passed" becomes an escalation, because waving a
//! patient through on a guess is the one unacceptable outcome.

use crate::config::ScreenConfig;
use crate::error::CompletionError;
use crate::llm::{backoff_delay, strip_code_fences, CompletionClient};
use crate::model::{
    EligibilityCriterion, ExtractedCriteria, FailedCriterion, ScreeningDecision, ScreeningRequest,
    ScreeningResult,
};
use crate::prompts;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Decisions below this confidence are downgraded to Escalate, unless the
/// decision is Disqualified.
const CONFIDENCE_FLOOR: f32 = 0.70;

const SCREEN_MAX_TOKENS: usize = 1024;

/// Screen one patient against a protocol's disqualifiers.
///
/// Candidates are `top_disqualifiers` when the ranker has run, otherwise all
/// exclusion criteria. Never returns an error.
pub async fn screen_patient(
    client: Option<&Arc<dyn CompletionClient>>,
    config: &ScreenConfig,
    request: &ScreeningRequest,
    extracted: &ExtractedCriteria,
) -> ScreeningResult {
    let candidates: Vec<&EligibilityCriterion> = if extracted.top_disqualifiers.is_empty() {
        extracted.exclusion_criteria()
    } else {
        extracted.top_disqualifiers.iter().collect()
    };

    let model_used = client.map(|c| c.model_id().to_string());

    if candidates.is_empty() {
        warn!(protocol_id = %request.protocol_id, "no disqualifiers to screen against");
        return escalate(
            request,
            "No disqualifying criteria available for screening.",
            model_used,
        );
    }

    let Some(client) = client else {
        return escalate(
            request,
            "No completion client is configured for screening.",
            None,
        );
    };

    let prompt = prompts::build_screening_prompt(request, &candidates);

    let mut last_error = String::new();
    for attempt in 1..=config.max_attempts {
        if attempt > 1 {
            tokio::time::sleep(backoff_delay(
                attempt - 1,
                config.retry_base_secs,
                config.retry_cap_secs,
            ))
            .await;
        }
        match client
            .complete(prompts::SCREENING_SYSTEM, &prompt, SCREEN_MAX_TOKENS)
            .await
        {
            Ok(raw) => return parse_response(&raw, request, &candidates, client.model_id()),
            Err(CompletionError::InvalidRequest(detail)) => {
                warn!(error = %detail, "screening request rejected");
                return escalate(
                    request,
                    &format!("Screening request was rejected by the completion service: {detail}"),
                    Some(client.model_id().to_string()),
                );
            }
            Err(CompletionError::Transient(detail)) => {
                warn!(attempt, error = %detail, "screening attempt failed");
                last_error = detail;
            }
        }
    }

    escalate(
        request,
        &format!(
            "Completion service unavailable after {} attempts: {last_error}",
            config.max_attempts
        ),
        Some(client.model_id().to_string()),
    )
}

fn escalate(request: &ScreeningRequest, reason: &str, model_used: Option<String>) -> ScreeningResult {
    ScreeningResult {
        patient_id: request.patient_id.clone(),
        protocol_id: request.protocol_id.clone(),
        decision: ScreeningDecision::Escalate,
        confidence: 0.0,
        failed_criteria: vec![],
        passed_criteria_count: 0,
        escalation_reason: Some(reason.to_string()),
        model_used,
    }
}

// ── Response parsing ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ScreenResponse {
    #[serde(default)]
    decision: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    failed_criteria: Vec<RawFailure>,
    #[serde(default)]
    escalation_reason: Option<String>,
}

#[derive(Deserialize)]
struct RawFailure {
    #[serde(default)]
    criterion_id: String,
    #[serde(default)]
    reason: String,
}

fn parse_response(
    raw: &str,
    request: &ScreeningRequest,
    candidates: &[&EligibilityCriterion],
    model_id: &str,
) -> ScreeningResult {
    let parsed: ScreenResponse = match serde_json::from_str(strip_code_fences(raw)) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "screening model returned unparsable output");
            return escalate(
                request,
                "Screening model returned an unparseable response; escalating to human review.",
                Some(model_id.to_string()),
            );
        }
    };

    let mut decision = match parsed.decision.as_deref() {
        Some("disqualified") => ScreeningDecision::Disqualified,
        Some("passed_prescreen") => ScreeningDecision::PassedPrescreen,
        _ => ScreeningDecision::Escalate,
    };
    let confidence = parsed.confidence.unwrap_or(0.5).clamp(0.0, 1.0);

    if confidence < CONFIDENCE_FLOOR && decision != ScreeningDecision::Disqualified {
        decision = ScreeningDecision::Escalate;
    }

    // Resolve cited ids back to the candidate criteria; unknown ids from the
    // model are dropped rather than fabricated into results.
    let by_id: HashMap<&str, &EligibilityCriterion> =
        candidates.iter().map(|c| (c.id.as_str(), *c)).collect();
    let failed: Vec<FailedCriterion> = parsed
        .failed_criteria
        .into_iter()
        .filter_map(|f| {
            by_id.get(f.criterion_id.as_str()).map(|c| FailedCriterion {
                criterion: (*c).clone(),
                reason: f.reason,
            })
        })
        .collect();

    info!(
        patient_id = %request.patient_id,
        protocol_id = %request.protocol_id,
        ?decision,
        confidence,
        failed = failed.len(),
        "screening decision"
    );

    ScreeningResult {
        patient_id: request.patient_id.clone(),
        protocol_id: request.protocol_id.clone(),
        decision,
        confidence,
        passed_criteria_count: candidates.len().saturating_sub(failed.len()),
        failed_criteria: failed,
        escalation_reason: parsed.escalation_reason,
        model_used: Some(model_id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CriterionType, ExtractionMetadata};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<Vec<Result<String, CompletionError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn arc(responses: Vec<Result<String, CompletionError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        fn model_id(&self) -> &str {
            "scripted"
        }
        async fn complete(
            &self,
            _system: &str,
            _user: &str,
            _max_tokens: usize,
        ) -> Result<String, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn criterion(id: &str, text: &str) -> EligibilityCriterion {
        EligibilityCriterion {
            id: id.into(),
            criterion_type: CriterionType::Exclusion,
            text: text.into(),
            source_page: Some(7),
            source_section: None,
            disqualification_power: Default::default(),
            has_temporal_condition: false,
            has_numeric_threshold: false,
            has_conditional_logic: false,
            is_ambiguous: false,
            notes: String::new(),
        }
    }

    fn extracted(top: Vec<EligibilityCriterion>) -> ExtractedCriteria {
        ExtractedCriteria {
            protocol_title: None,
            sponsor: None,
            phase: None,
            therapeutic_area: None,
            criteria: top.clone(),
            top_disqualifiers: top,
            metadata: ExtractionMetadata {
                model_used: "m".into(),
                protocol_version: None,
                extraction_confidence: 1.0,
                section_found: true,
                section_name: None,
                warnings: vec![],
            },
        }
    }

    fn request() -> ScreeningRequest {
        let mut data = serde_json::Map::new();
        data.insert("pregnant".into(), serde_json::json!(true));
        ScreeningRequest {
            patient_id: "pat_1".into(),
            protocol_id: "proto_1".into(),
            patient_data: data,
        }
    }

    #[tokio::test]
    async fn no_candidates_escalates_without_a_model_call() {
        let client = ScriptedClient::arc(vec![]);
        let arc: Arc<dyn CompletionClient> = client.clone();
        let result = screen_patient(
            Some(&arc),
            &ScreenConfig::default(),
            &request(),
            &extracted(vec![]),
        )
        .await;
        assert_eq!(result.decision, ScreeningDecision::Escalate);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(
            result.escalation_reason.as_deref(),
            Some("No disqualifying criteria available for screening.")
        );
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_client_escalates() {
        let result = screen_patient(
            None,
            &ScreenConfig::default(),
            &request(),
            &extracted(vec![criterion("exc_001", "Pregnancy")]),
        )
        .await;
        assert_eq!(result.decision, ScreeningDecision::Escalate);
        assert!(result.escalation_reason.unwrap().contains("client"));
    }

    #[tokio::test]
    async fn disqualification_resolves_cited_criteria() {
        let payload = serde_json::json!({
            "decision": "disqualified",
            "confidence": 0.95,
            "failed_criteria": [
                {"criterion_id": "exc_001", "reason": "Patient is pregnant"},
                {"criterion_id": "made_up", "reason": "hallucinated"}
            ],
            "escalation_reason": null
        })
        .to_string();
        let arc: Arc<dyn CompletionClient> = ScriptedClient::arc(vec![Ok(payload)]);
        let ex = extracted(vec![
            criterion("exc_001", "Pregnancy or lactation"),
            criterion("exc_002", "Prior malignancy"),
        ]);
        let result =
            screen_patient(Some(&arc), &ScreenConfig::default(), &request(), &ex).await;
        assert_eq!(result.decision, ScreeningDecision::Disqualified);
        assert_eq!(result.failed_criteria.len(), 1);
        assert_eq!(result.failed_criteria[0].criterion.id, "exc_001");
        assert_eq!(result.passed_criteria_count, 1);
    }

    #[tokio::test]
    async fn low_confidence_pass_downgrades_to_escalate() {
        let payload = serde_json::json!({
            "decision": "passed_prescreen",
            "confidence": 0.4,
            "failed_criteria": []
        })
        .to_string();
        let arc: Arc<dyn CompletionClient> = ScriptedClient::arc(vec![Ok(payload)]);
        let ex = extracted(vec![criterion("exc_001", "Pregnancy")]);
        let result =
            screen_patient(Some(&arc), &ScreenConfig::default(), &request(), &ex).await;
        assert_eq!(result.decision, ScreeningDecision::Escalate);
        assert!((result.confidence - 0.4).abs() < 1e-6);
    }

    #[tokio::test]
    async fn low_confidence_disqualification_stands() {
        let payload = serde_json::json!({
            "decision": "disqualified",
            "confidence": 0.5,
            "failed_criteria": [{"criterion_id": "exc_001", "reason": "likely pregnant"}]
        })
        .to_string();
        let arc: Arc<dyn CompletionClient> = ScriptedClient::arc(vec![Ok(payload)]);
        let ex = extracted(vec![criterion("exc_001", "Pregnancy")]);
        let result =
            screen_patient(Some(&arc), &ScreenConfig::default(), &request(), &ex).await;
        assert_eq!(result.decision, ScreeningDecision::Disqualified);
    }

    #[tokio::test]
    async fn unknown_decision_escalates() {
        let payload = serde_json::json!({"decision": "maybe", "confidence": 0.9}).to_string();
        let arc: Arc<dyn CompletionClient> = ScriptedClient::arc(vec![Ok(payload)]);
        let ex = extracted(vec![criterion("exc_001", "Pregnancy")]);
        let result =
            screen_patient(Some(&arc), &ScreenConfig::default(), &request(), &ex).await;
        assert_eq!(result.decision, ScreeningDecision::Escalate);
    }

    #[tokio::test]
    async fn unparsable_output_escalates() {
        let arc: Arc<dyn CompletionClient> =
            ScriptedClient::arc(vec![Ok("the patient seems fine".into())]);
        let ex = extracted(vec![criterion("exc_001", "Pregnancy")]);
        let result =
            screen_patient(Some(&arc), &ScreenConfig::default(), &request(), &ex).await;
        assert_eq!(result.decision, ScreeningDecision::Escalate);
        assert_eq!(result.confidence, 0.0);
        assert!(result.escalation_reason.unwrap().contains("unparseable"));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_exhaustion_escalates_instead_of_erroring() {
        let client = ScriptedClient::arc(vec![
            Err(CompletionError::Transient("503".into())),
            Err(CompletionError::Transient("503".into())),
            Err(CompletionError::Transient("503".into())),
        ]);
        let arc: Arc<dyn CompletionClient> = client.clone();
        let ex = extracted(vec![criterion("exc_001", "Pregnancy")]);
        let result =
            screen_patient(Some(&arc), &ScreenConfig::default(), &request(), &ex).await;
        assert_eq!(result.decision, ScreeningDecision::Escalate);
        assert!(result.escalation_reason.unwrap().contains("3 attempts"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }
}
