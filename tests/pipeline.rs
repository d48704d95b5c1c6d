//! Integration tests for the protocol-to-prescreen pipeline.
//!
//! Everything runs against in-memory stubs: a `PdfSource` serving canned page
//! text, an `OcrEngine` with scripted words, and a `CompletionClient` with
//! scripted responses. No pdfium binary, no tesseract, no network.

use async_trait::async_trait;
use image::DynamicImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use trialscreen::ocr::{OcrEngine, OcrError, OcrWord, RecognizedText};
use trialscreen::pdf::{PdfError, PdfSource};
use trialscreen::pipeline::{classify, criteria, extract, locate, rank, screen};
use trialscreen::{
    CompletionClient, CompletionError, CriterionType, DisqualificationPower, LocateMethod,
    PdfType, ScreenConfig, ScreeningDecision, ScreeningRequest,
};

// ── Stubs ────────────────────────────────────────────────────────────────

struct StubPdf {
    pages: Vec<String>,
}

impl StubPdf {
    fn new(pages: Vec<String>) -> Self {
        Self { pages }
    }
}

impl PdfSource for StubPdf {
    fn source_name(&self) -> &str {
        "protocol.pdf"
    }
    fn is_encrypted(&self) -> bool {
        false
    }
    fn page_count(&self) -> usize {
        self.pages.len()
    }
    fn page_text(&self, index: usize) -> Result<String, PdfError> {
        Ok(self.pages[index].clone())
    }
    fn render_page(&self, _index: usize, _max_pixels: u32) -> Result<DynamicImage, PdfError> {
        Ok(DynamicImage::new_rgb8(8, 8))
    }
}

struct StubOcr {
    words: Vec<(String, f32)>,
}

impl OcrEngine for StubOcr {
    fn recognize(&self, _image: &DynamicImage) -> Result<RecognizedText, OcrError> {
        Ok(RecognizedText {
            words: self
                .words
                .iter()
                .map(|(t, c)| OcrWord {
                    text: t.clone(),
                    confidence: *c,
                })
                .collect(),
        })
    }
}

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
        "scripted-model"
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

// ── Fixtures ─────────────────────────────────────────────────────────────

/// A ten-page protocol with a TOC on page 1 and a criteria section on
/// pages 5-7, followed by study procedures on page 8.
fn protocol_pages() -> Vec<String> {
    let filler = "This protocol describes the study design and background. ".repeat(4);
    let mut pages = vec!["Table of Contents\n\
         1. Background ............ 2\n\
         4.1 Inclusion Criteria ............ 5\n\
         4.2 Exclusion Criteria ............ 6\n\
         5. Study Procedures ............ 8\n"
        .to_string()];
    for _ in 2..=4 {
        pages.push(filler.clone());
    }
    pages.push(format!(
        "4.1 Inclusion Criteria\n\
         1. Age >= 18 years at time of consent.\n\
         2. Histologically confirmed diagnosis.\n\
         3. ECOG performance status 0-1.\n{filler}"
    ));
    pages.push(format!(
        "4.2 Exclusion Criteria\n\
         1. Pregnant or lactating women.\n\
         2. Prior malignancy within 5 years.\n\
         3. eGFR < 30 mL/min.\n{filler}"
    ));
    pages.push(filler.clone());
    pages.push(format!("5. Study Procedures\nVisit schedule follows.\n{filler}"));
    pages.push(filler.clone());
    pages.push(filler);
    pages
}

fn extraction_payload() -> String {
    serde_json::json!({
        "protocol_title": "A Phase 2 Study of Example",
        "sponsor": "Acme Oncology",
        "phase": "2",
        "therapeutic_area": "oncology",
        "criteria": [
            {
                "id": "inc_001",
                "criterion_type": "inclusion",
                "text": "Age >= 18 years at time of consent.",
                "source_page": 5,
                "has_numeric_threshold": true
            },
            {
                "id": "exc_001",
                "criterion_type": "exclusion",
                "text": "Pregnant or lactating women.",
                "source_page": 6
            },
            {
                "id": "exc_002",
                "criterion_type": "exclusion",
                "text": "Prior malignancy within 5 years.",
                "source_page": 6,
                "has_temporal_condition": true
            },
            {
                "id": "exc_003",
                "criterion_type": "exclusion",
                "text": "eGFR < 30 mL/min.",
                "source_page": 6,
                "has_numeric_threshold": true
            }
        ]
    })
    .to_string()
}

fn patient_request(pregnant: bool) -> ScreeningRequest {
    let mut data = serde_json::Map::new();
    data.insert("age".into(), serde_json::json!(46));
    data.insert("pregnant".into(), serde_json::json!(pregnant));
    ScreeningRequest {
        patient_id: "pat_001".into(),
        protocol_id: "proto_abc".into(),
        patient_data: data,
    }
}

// ── End-to-end over stubs ────────────────────────────────────────────────

#[tokio::test]
async fn protocol_flows_from_pages_to_ranked_disqualifiers() {
    let source = StubPdf::new(protocol_pages());
    let ocr = StubOcr { words: vec![] };
    let config = ScreenConfig::default();

    let pdf_type = classify::classify(&source, config.ocr_quality_threshold);
    assert_eq!(pdf_type, PdfType::Text);

    let document = extract::extract_pages(&source, pdf_type, &ocr, &config).unwrap();
    assert_eq!(document.total_pages, 10);
    assert!(document.extraction_warnings.is_empty());

    // Deterministic location: TOC entry points straight at the section.
    let location = locate::locate_eligibility_section(&document, None, &config).await;
    assert_eq!(location.method, LocateMethod::Toc);
    assert_eq!(location.start_page, 5);
    assert!(location.end_page >= 6);

    let client = ScriptedClient::arc(vec![Ok(extraction_payload())]);
    let section_pages = location.pages(&document);
    let extracted = criteria::extract_criteria(client.as_ref(), &config, &location, &section_pages)
        .await
        .unwrap();
    assert_eq!(extracted.criteria.len(), 4);
    assert_eq!(extracted.metadata.model_used, "scripted-model");
    assert!(extracted.metadata.section_found);

    let ranked = rank::rank_disqualifiers(extracted, config.top_n_disqualifiers);
    assert_eq!(ranked.top_disqualifiers.len(), 3);
    // Prior malignancy (3.0) plus its temporal window (+0.5) edges out
    // pregnancy (3.0); eGFR (2.5) plus numeric threshold (+1.0) ties it.
    let ids: Vec<&str> = ranked
        .top_disqualifiers
        .iter()
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(ids, vec!["exc_002", "exc_003", "exc_001"]);
    assert!(ranked
        .top_disqualifiers
        .iter()
        .all(|c| c.disqualification_power == DisqualificationPower::High));
    assert!(ranked
        .top_disqualifiers
        .iter()
        .all(|c| c.criterion_type == CriterionType::Exclusion));
}

#[tokio::test]
async fn pregnant_patient_is_disqualified_citing_the_criterion() {
    let config = ScreenConfig::default();
    let location = trialscreen::SectionLocation {
        start_page: 5,
        end_page: 7,
        section_name: Some("4.1 Inclusion Criteria".into()),
        confidence: 0.95,
        method: LocateMethod::Toc,
    };
    let extracted = {
        let client = ScriptedClient::arc(vec![Ok(extraction_payload())]);
        let page = trialscreen::PageText {
            page_number: 5,
            text: "criteria text".into(),
            char_count: 13,
            ocr_used: false,
            confidence: 1.0,
        };
        let extracted =
            criteria::extract_criteria(client.as_ref(), &config, &location, &[&page])
                .await
                .unwrap();
        rank::rank_disqualifiers(extracted, 8)
    };

    let screening_payload = serde_json::json!({
        "decision": "disqualified",
        "confidence": 0.97,
        "failed_criteria": [
            {"criterion_id": "exc_001", "reason": "Patient record shows pregnant: true"}
        ],
        "escalation_reason": null
    })
    .to_string();
    let client = ScriptedClient::arc(vec![Ok(screening_payload)]);
    let arc: Arc<dyn CompletionClient> = client.clone();

    let result = screen::screen_patient(Some(&arc), &config, &patient_request(true), &extracted).await;
    assert_eq!(result.decision, ScreeningDecision::Disqualified);
    assert_eq!(result.failed_criteria.len(), 1);
    assert_eq!(result.failed_criteria[0].criterion.id, "exc_001");
    assert!(result.failed_criteria[0].criterion.text.contains("Pregnant"));
    assert_eq!(result.passed_criteria_count, 2);
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scanned_protocol_goes_through_ocr() {
    // Sparse native text on every page forces the OCR path.
    let source = StubPdf::new(vec!["p1".into(), "p2".into()]);
    let words: Vec<(String, f32)> = "Exclusion Criteria 1. Pregnant or lactating women ."
        .split_whitespace()
        .map(|w| (w.to_string(), 0.9))
        .collect();
    let ocr = StubOcr { words };
    let config = ScreenConfig::default();

    let pdf_type = classify::classify(&source, config.ocr_quality_threshold);
    assert_eq!(pdf_type, PdfType::Scanned);

    let document = extract::extract_pages(&source, pdf_type, &ocr, &config).unwrap();
    assert!(document.pages.iter().all(|p| p.ocr_used));
    assert!(document.pages.iter().all(|p| (p.confidence - 0.9).abs() < 1e-6));
    assert!(document.full_text().contains("Pregnant or lactating"));
}

#[tokio::test]
async fn featureless_document_still_reaches_extraction_via_fallback() {
    let pages: Vec<String> = (0..6).map(|_| "plain narrative text only".to_string()).collect();
    let source = StubPdf::new(pages);
    let ocr = StubOcr {
        words: vec![("narrative".into(), 0.8), ("text".into(), 0.8)],
    };
    let config = ScreenConfig::builder()
        .llm_section_fallback(false)
        .build()
        .unwrap();

    let pdf_type = classify::classify(&source, config.ocr_quality_threshold);
    let document = extract::extract_pages(&source, pdf_type, &ocr, &config).unwrap();
    let location = locate::locate_eligibility_section(&document, None, &config).await;

    assert_eq!(location.method, LocateMethod::FullDocFallback);
    assert_eq!(location.start_page, 1);
    assert_eq!(location.end_page, document.total_pages);
    assert_eq!(location.pages(&document).len(), document.total_pages);
}

#[tokio::test]
async fn screening_survives_flaky_transport_and_stays_conservative() {
    let config = ScreenConfig::default();
    let extracted = {
        let client = ScriptedClient::arc(vec![Ok(extraction_payload())]);
        let location = trialscreen::SectionLocation {
            start_page: 1,
            end_page: 1,
            section_name: None,
            confidence: 0.1,
            method: LocateMethod::FullDocFallback,
        };
        let page = trialscreen::PageText {
            page_number: 1,
            text: "criteria".into(),
            char_count: 8,
            ocr_used: false,
            confidence: 1.0,
        };
        rank::rank_disqualifiers(
            criteria::extract_criteria(client.as_ref(), &config, &location, &[&page])
                .await
                .unwrap(),
            8,
        )
    };

    // Model waffles with low confidence: the pass must not stand.
    let payload = serde_json::json!({
        "decision": "passed_prescreen",
        "confidence": 0.55,
        "failed_criteria": [],
        "escalation_reason": "Patient data lacks renal function values"
    })
    .to_string();
    let arc: Arc<dyn CompletionClient> = ScriptedClient::arc(vec![Ok(payload)]);
    let result = screen::screen_patient(Some(&arc), &config, &patient_request(false), &extracted).await;

    assert_eq!(result.decision, ScreeningDecision::Escalate);
    assert_eq!(
        result.escalation_reason.as_deref(),
        Some("Patient data lacks renal function values")
    );
}
