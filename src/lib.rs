//! # trialscreen
//!
//! Extract eligibility criteria from clinical-trial protocol PDFs and
//! pre-screen patients against the highest-impact exclusions.
//!
//! ## Why this crate?
//!
//! A protocol PDF is 50–200 pages; its eligibility criteria occupy three or
//! four of them, and a handful of those criteria (pregnancy, prior
//! malignancy, organ function) disqualify most ineligible candidates. This
//! crate finds that section, extracts every criterion verbatim with page
//! provenance, ranks the exclusions by disqualification power, and screens
//! patient records against the top of that list, escalating anything it
//! cannot decide conservatively.
//!
//! ## Pipeline Overview
//!
//! ```text
//! protocol.pdf
//!  │
//!  ├─ 1. Classify  text / scanned / hybrid, by sampling page text density
//!  ├─ 2. Extract   native text per page, OCR fallback (CPU-bound, spawn_blocking)
//!  ├─ 3. Locate    eligibility section: TOC → heuristic → model → full doc
//!  ├─ 4. Criteria  structured extraction via completion service (strict JSON)
//!  ├─ 5. Rank      disqualification power scoring, top-N exclusions
//!  └─ 6. Screen    per-patient decision: disqualified / passed / escalate
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use trialscreen::{run_protocol_pipeline, run_screening_pipeline, ScreenConfig, ScreeningRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / ...
//!     let config = ScreenConfig::default();
//!     let extracted = run_protocol_pipeline("protocol.pdf", &config).await?;
//!     println!("{} criteria, top {} disqualifiers",
//!         extracted.criteria.len(),
//!         extracted.top_disqualifiers.len());
//!
//!     let request = ScreeningRequest {
//!         patient_id: "pat_001".into(),
//!         protocol_id: "sha256...".into(),
//!         patient_data: serde_json::from_str(r#"{"age": 62, "pregnant": false}"#)?,
//!     };
//!     let result = run_screening_pipeline(&request, &extracted, &config).await;
//!     println!("{:?} ({:.0}%)", result.decision, result.confidence * 100.0);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `trialscreen` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! trialscreen = { version = "0.1", default-features = false }
//! ```
//!
//! ## Safety posture
//!
//! This is a pre-screen, not an eligibility determination. The screener only
//! ever rules patients out or escalates; a "passed_prescreen" decision still
//! requires full-criteria review by a human. Every stage degrades toward
//! escalation rather than guessing.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod llm;
pub mod model;
pub mod ocr;
pub mod pdf;
pub mod pipeline;
pub mod prompts;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ScreenConfig, ScreenConfigBuilder};
pub use error::{CompletionError, ScreenError};
pub use llm::CompletionClient;
pub use model::{
    CriterionType, DisqualificationPower, EligibilityCriterion, ExtractedCriteria,
    ExtractionMetadata, FailedCriterion, LocateMethod, PageText, ParsedDocument, PdfType,
    ScreeningDecision, ScreeningRequest, ScreeningResult, SectionLocation,
};
pub use ocr::OcrEngine;
pub use pdf::{file_sha256, PdfSource};
pub use pipeline::classify::classify_path;
pub use pipeline::rank::RankPolicy;
pub use run::{run_protocol_pipeline, run_screening_pipeline};
