//! Prompt templates and builders for every completion call in the pipeline.
//!
//! Keeping prompts in one module makes them easy to version and iterate on
//! without touching pipeline logic, and lets tests assert on exact prompt
//! structure.

use crate::model::{EligibilityCriterion, PageText, ParsedDocument, ScreeningRequest};
use serde_json::json;

/// System prompt for criteria extraction.
pub const EXTRACTION_SYSTEM: &str = "\
You are a clinical trial protocol analyst. Extract eligibility criteria from the
provided protocol section.

Rules:
1. Extract EVERY inclusion and exclusion criterion verbatim.
2. For each criterion, cite the page number from which it was extracted, using
   the --- PAGE N --- markers in the text.
3. Flag criteria with temporal conditions (\"within X weeks/months\"), numeric
   thresholds (eGFR, HbA1c, creatinine, ...), or conditional logic (\"unless\",
   \"except when\", \"provided that\").
4. Flag criteria with ambiguous language (e.g. \"clinically significant\",
   \"adequate\").
5. Do NOT invent, infer, or paraphrase. Only extract what is explicitly stated.
6. Output ONLY valid JSON matching the schema. No prose outside the JSON.";

/// System prompt for the model-assisted section locator pass.
pub const SECTION_DETECTION_SYSTEM: &str = "\
You are analysing the page structure of a clinical trial protocol document.
Your job is to identify which pages contain the Inclusion and Exclusion
Criteria section. Reply with compact JSON only. No prose.";

/// System prompt for patient pre-screening.
pub const SCREENING_SYSTEM: &str = "\
You are a clinical trial eligibility screener. You will be given:
1. A patient's clinical data.
2. A list of exclusion criteria from a clinical trial protocol.

For each criterion, determine if the patient data provides enough information
to evaluate it. Then decide:

- \"disqualified\": patient clearly meets one or more exclusion criteria (high confidence).
- \"passed_prescreen\": patient does not meet any listed exclusion criteria.
- \"escalate\": patient data is insufficient, ambiguous, or the criterion requires
  clinical judgment beyond what you can determine from the data.

When in doubt, escalate. Never guess on ambiguous data.
Output ONLY valid JSON. No prose outside the JSON object.";

/// Join non-blank section pages into a single transcript with page markers.
///
/// The markers are what lets the model cite `source_page` for each criterion.
pub fn build_section_transcript(pages: &[&PageText]) -> String {
    pages
        .iter()
        .filter(|p| !p.text.trim().is_empty())
        .map(|p| format!("--- PAGE {} ---\n{}", p.page_number, p.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Build the user prompt for criteria extraction.
pub fn build_extraction_prompt(section_text: &str) -> String {
    let schema_example = json!({
        "protocol_title": "string or null",
        "sponsor": "string or null",
        "phase": "string or null",
        "therapeutic_area": "string or null",
        "criteria": [{
            "id": "inc_001",
            "criterion_type": "inclusion",
            "text": "verbatim criterion text",
            "source_page": 46,
            "source_section": "5.1 Inclusion Criteria",
            "has_temporal_condition": false,
            "has_numeric_threshold": false,
            "has_conditional_logic": false,
            "is_ambiguous": false,
            "notes": "",
        }],
    });
    format!(
        "Extract all eligibility criteria from the following protocol section.\n\n\
         OUTPUT SCHEMA:\n{schema}\n\n\
         PROTOCOL SECTION:\n{section_text}",
        schema = pretty(&schema_example),
    )
}

/// Build the per-page snippet prompt for the section-locator model pass.
///
/// Each page contributes its number and first ~200 characters with newlines
/// flattened, which keeps the prompt small even for 200-page protocols.
pub fn build_section_detection_prompt(document: &ParsedDocument) -> String {
    let snippets = document
        .pages
        .iter()
        .map(|p| {
            let head: String = p.text.chars().take(200).collect();
            format!("[Page {}]: {}", p.page_number, head.replace('\n', " "))
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Below is a snippet from the start of each page of a clinical trial protocol.\n\n\
         {snippets}\n\n\
         Identify the START page and END page (inclusive) that contain the \
         Inclusion and Exclusion Criteria section. \
         Reply ONLY with JSON: {{\"start_page\": <int>, \"end_page\": <int>, \"section_name\": \"<string>\"}}"
    )
}

/// Build the user prompt for patient screening.
pub fn build_screening_prompt(
    request: &ScreeningRequest,
    criteria: &[&EligibilityCriterion],
) -> String {
    let criteria_block: Vec<_> = criteria
        .iter()
        .map(|c| json!({"id": c.id, "text": c.text, "is_ambiguous": c.is_ambiguous}))
        .collect();
    let schema = json!({
        "decision": "disqualified | passed_prescreen | escalate",
        "confidence": 0.95,
        "failed_criteria": [
            {"criterion_id": "exc_001", "reason": "Patient has active hepatitis B (HBsAg positive)"}
        ],
        "escalation_reason": "string or null",
    });
    format!(
        "PATIENT DATA:\n{patient}\n\n\
         EXCLUSION CRITERIA:\n{criteria}\n\n\
         OUTPUT SCHEMA:\n{schema}",
        patient = pretty(&serde_json::Value::Object(request.patient_data.clone())),
        criteria = pretty(&serde_json::Value::Array(criteria_block)),
        schema = pretty(&schema),
    )
}

fn pretty(value: &serde_json::Value) -> String {
    // Pretty-printing a value we just built cannot fail.
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CriterionType, DisqualificationPower, PdfType};

    fn page(n: usize, text: &str) -> PageText {
        PageText {
            page_number: n,
            text: text.to_string(),
            char_count: text.chars().count(),
            ocr_used: false,
            confidence: 1.0,
        }
    }

    #[test]
    fn transcript_has_page_markers_and_skips_blanks() {
        let p1 = page(4, "Inclusion Criteria");
        let p2 = page(5, "   ");
        let p3 = page(6, "Exclusion Criteria");
        let transcript = build_section_transcript(&[&p1, &p2, &p3]);
        assert!(transcript.contains("--- PAGE 4 ---"));
        assert!(transcript.contains("--- PAGE 6 ---"));
        assert!(!transcript.contains("--- PAGE 5 ---"));
    }

    #[test]
    fn extraction_prompt_embeds_schema_and_section() {
        let prompt = build_extraction_prompt("--- PAGE 1 ---\nsome text");
        assert!(prompt.contains("OUTPUT SCHEMA:"));
        assert!(prompt.contains("\"criterion_type\": \"inclusion\""));
        assert!(prompt.contains("PROTOCOL SECTION:\n--- PAGE 1 ---"));
    }

    #[test]
    fn section_detection_prompt_truncates_and_flattens() {
        let long = format!("first line\n{}", "x".repeat(400));
        let doc = ParsedDocument {
            source_name: "p.pdf".into(),
            pdf_type: PdfType::Text,
            total_pages: 1,
            pages: vec![page(1, &long)],
            extraction_warnings: vec![],
        };
        let prompt = build_section_detection_prompt(&doc);
        assert!(prompt.contains("[Page 1]: first line "));
        assert!(!prompt.contains("first line\n"));
        // 200-char cap per page
        assert!(!prompt.contains(&"x".repeat(250)));
    }

    #[test]
    fn screening_prompt_has_all_three_blocks() {
        let mut data = serde_json::Map::new();
        data.insert("age".into(), serde_json::json!(62));
        let request = ScreeningRequest {
            patient_id: "pat_1".into(),
            protocol_id: "proto_1".into(),
            patient_data: data,
        };
        let criterion = EligibilityCriterion {
            id: "exc_001".into(),
            criterion_type: CriterionType::Exclusion,
            text: "Pregnant or lactating".into(),
            source_page: Some(7),
            source_section: None,
            disqualification_power: DisqualificationPower::VeryHigh,
            has_temporal_condition: false,
            has_numeric_threshold: false,
            has_conditional_logic: false,
            is_ambiguous: false,
            notes: String::new(),
        };
        let prompt = build_screening_prompt(&request, &[&criterion]);
        assert!(prompt.contains("PATIENT DATA:"));
        assert!(prompt.contains("EXCLUSION CRITERIA:"));
        assert!(prompt.contains("OUTPUT SCHEMA:"));
        assert!(prompt.contains("exc_001"));
        assert!(prompt.contains("\"age\": 62"));
    }
}
