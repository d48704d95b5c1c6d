//! Core data model: parsed documents, eligibility criteria, screening results.
//!
//! Everything here is serde-serialisable because [`ExtractedCriteria`] is the
//! durable artifact the caller persists (keyed by protocol id) and feeds back
//! into the screening flow, possibly from a different process. The rest of the
//! types are pipeline-scoped values that live for a single run.
//!
//! Criteria referenced from `top_disqualifiers` and from
//! `ScreeningResult::failed_criteria` are the same logical entities as the
//! entries in the full criteria list: they share the stable `id`, and
//! downstream consumers match on that id rather than on object identity.

use serde::{Deserialize, Serialize};

// ── PDF parsing ──────────────────────────────────────────────────────────

/// Classification of a protocol PDF, computed once before extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdfType {
    /// Native text layer on every sampled page.
    Text,
    /// Image-only; every sampled page needs OCR.
    Scanned,
    /// Mixed text and image pages.
    Hybrid,
    /// Password-protected; cannot be read at all.
    Encrypted,
    /// Could not be opened or has no pages.
    Unknown,
}

/// Text recovered from a single page. Built once during extraction and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    /// 1-indexed page number.
    pub page_number: usize,
    pub text: String,
    pub char_count: usize,
    pub ocr_used: bool,
    /// 1.0 for native text; mean per-word recognition confidence for OCR;
    /// 0.0 for a page that produced no usable text.
    pub confidence: f32,
}

/// A fully extracted protocol document, in page order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub source_name: String,
    pub pdf_type: PdfType,
    pub total_pages: usize,
    pub pages: Vec<PageText>,
    /// One entry per page-level problem (e.g. an OCR miss). A blank page with
    /// no matching warning is a bug, not a valid state.
    pub extraction_warnings: Vec<String>,
}

impl ParsedDocument {
    /// All non-empty page text joined with blank lines.
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .filter(|p| !p.text.trim().is_empty())
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ── Section location ─────────────────────────────────────────────────────

/// Which locator pass produced a [`SectionLocation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateMethod {
    Toc,
    Heuristic,
    Llm,
    FullDocFallback,
}

/// The page range most likely to hold the eligibility criteria section.
///
/// Invariant: `start_page <= end_page <= total_pages`, 1-indexed inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionLocation {
    pub start_page: usize,
    pub end_page: usize,
    pub section_name: Option<String>,
    pub confidence: f32,
    pub method: LocateMethod,
}

impl SectionLocation {
    /// Slice the pages covered by this location out of `document`.
    pub fn pages<'a>(&self, document: &'a ParsedDocument) -> Vec<&'a PageText> {
        document
            .pages
            .iter()
            .filter(|p| self.start_page <= p.page_number && p.page_number <= self.end_page)
            .collect()
    }
}

// ── Eligibility criteria ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriterionType {
    Inclusion,
    Exclusion,
}

/// Estimated fraction of a general candidate population an exclusion
/// criterion would eliminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisqualificationPower {
    /// More than ~30% eliminated.
    VeryHigh,
    /// ~10–30%.
    High,
    /// ~3–10%.
    Medium,
    /// Under ~3%.
    Low,
    /// Not yet ranked.
    #[default]
    Unknown,
}

/// A single inclusion or exclusion rule, verbatim from the protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityCriterion {
    /// Stable identifier, e.g. `exc_001`.
    pub id: String,
    pub criterion_type: CriterionType,
    /// Verbatim criterion text — never paraphrased.
    pub text: String,
    /// Page the text was extracted from; `None` means the wording could not
    /// be grounded and must be treated as unverified.
    pub source_page: Option<usize>,
    pub source_section: Option<String>,
    #[serde(default)]
    pub disqualification_power: DisqualificationPower,
    /// "within 4 weeks", "in the last 6 months", …
    #[serde(default)]
    pub has_temporal_condition: bool,
    /// "eGFR >= 30", "HbA1c < 7%", …
    #[serde(default)]
    pub has_numeric_threshold: bool,
    /// "unless", "except when", "provided that", …
    #[serde(default)]
    pub has_conditional_logic: bool,
    /// "clinically significant", "adequate" — needs human interpretation.
    #[serde(default)]
    pub is_ambiguous: bool,
    #[serde(default)]
    pub notes: String,
}

/// Provenance and quality metadata attached to an extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub model_used: String,
    pub protocol_version: Option<String>,
    /// 0–1 scalar trustworthiness signal: 1.0 minus a penalty proportional to
    /// the warning-to-criteria ratio (penalty capped at 0.5).
    pub extraction_confidence: f32,
    pub section_found: bool,
    pub section_name: Option<String>,
    pub warnings: Vec<String>,
}

/// The pipeline's durable output: protocol metadata, the complete criteria
/// list, and the ranked top disqualifiers used for fast pre-screening.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedCriteria {
    pub protocol_title: Option<String>,
    pub sponsor: Option<String>,
    pub phase: Option<String>,
    pub therapeutic_area: Option<String>,
    pub criteria: Vec<EligibilityCriterion>,
    /// Top-N exclusion criteria by disqualification power. Empty until the
    /// ranker has run.
    #[serde(default)]
    pub top_disqualifiers: Vec<EligibilityCriterion>,
    pub metadata: ExtractionMetadata,
}

impl ExtractedCriteria {
    pub fn inclusion_criteria(&self) -> Vec<&EligibilityCriterion> {
        self.criteria
            .iter()
            .filter(|c| c.criterion_type == CriterionType::Inclusion)
            .collect()
    }

    pub fn exclusion_criteria(&self) -> Vec<&EligibilityCriterion> {
        self.criteria
            .iter()
            .filter(|c| c.criterion_type == CriterionType::Exclusion)
            .collect()
    }
}

// ── Screening ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningDecision {
    /// Patient clearly meets at least one exclusion criterion.
    Disqualified,
    /// Passed the top disqualifiers; still needs full-criteria review.
    PassedPrescreen,
    /// Could not safely decide — human follow-up required.
    Escalate,
}

/// A criterion the patient failed, with the model's stated reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedCriterion {
    pub criterion: EligibilityCriterion,
    pub reason: String,
}

/// Patient data submitted for screening against a protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningRequest {
    pub patient_id: String,
    pub protocol_id: String,
    /// Free-form patient attributes (age, diagnoses, labs, medications…).
    /// Keys are unique; the pipeline treats values as opaque.
    pub patient_data: serde_json::Map<String, serde_json::Value>,
}

/// The outcome of one screening call. Built once; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub patient_id: String,
    pub protocol_id: String,
    pub decision: ScreeningDecision,
    pub confidence: f32,
    #[serde(default)]
    pub failed_criteria: Vec<FailedCriterion>,
    #[serde(default)]
    pub passed_criteria_count: usize,
    pub escalation_reason: Option<String>,
    pub model_used: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn full_text_skips_empty_pages() {
        let doc = ParsedDocument {
            source_name: "p.pdf".into(),
            pdf_type: PdfType::Text,
            total_pages: 3,
            pages: vec![page(1, "alpha"), page(2, "   "), page(3, "beta")],
            extraction_warnings: vec![],
        };
        assert_eq!(doc.full_text(), "alpha\n\nbeta");
    }

    #[test]
    fn section_location_pages_inclusive() {
        let doc = ParsedDocument {
            source_name: "p.pdf".into(),
            pdf_type: PdfType::Text,
            total_pages: 4,
            pages: (1..=4).map(|n| page(n, "x")).collect(),
            extraction_warnings: vec![],
        };
        let loc = SectionLocation {
            start_page: 2,
            end_page: 3,
            section_name: None,
            confidence: 0.9,
            method: LocateMethod::Toc,
        };
        let selected: Vec<usize> = loc.pages(&doc).iter().map(|p| p.page_number).collect();
        assert_eq!(selected, vec![2, 3]);
    }

    #[test]
    fn decision_serialises_snake_case() {
        let json = serde_json::to_string(&ScreeningDecision::PassedPrescreen).unwrap();
        assert_eq!(json, "\"passed_prescreen\"");
        let back: ScreeningDecision = serde_json::from_str("\"escalate\"").unwrap();
        assert_eq!(back, ScreeningDecision::Escalate);
    }

    #[test]
    fn locate_method_serialises_snake_case() {
        let json = serde_json::to_string(&LocateMethod::FullDocFallback).unwrap();
        assert_eq!(json, "\"full_doc_fallback\"");
    }
}
