//! Top-level orchestration: the two pipeline entry points.
//!
//! [`run_protocol_pipeline`] — PDF file → ranked [`ExtractedCriteria`].
//! [`run_screening_pipeline`] — patient + criteria → [`ScreeningResult`].
//!
//! All pdfium and OCR work happens inside a single `spawn_blocking` closure:
//! pdfium keeps thread-local state and must be created and used on the same
//! thread, and OCR is CPU-bound anyway.

use crate::config::ScreenConfig;
use crate::error::ScreenError;
use crate::llm::resolve_client;
use crate::model::{ExtractedCriteria, ParsedDocument, ScreeningRequest, ScreeningResult};
use crate::ocr::{OcrEngine, TesseractCli};
use crate::pdf::{file_sha256, PdfError, PdfiumSource};
use crate::pipeline::{classify, criteria, extract, locate, rank, screen};
use pdfium_render::prelude::Pdfium;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Full pipeline: protocol PDF → structured criteria with ranked
/// disqualifiers.
///
/// Fatal only when the document is unreadable or the completion service
/// definitively fails; page-level problems surface as warnings on the result.
pub async fn run_protocol_pipeline(
    path: impl AsRef<Path>,
    config: &ScreenConfig,
) -> Result<ExtractedCriteria, ScreenError> {
    let path = path.as_ref().to_path_buf();

    // Fail before touching the PDF if no completion client can exist; the
    // criteria stage cannot run without one.
    let client = resolve_client(config)?;

    if let Ok(sha) = file_sha256(&path) {
        info!(pdf = %path.display(), protocol_id = %sha, "pipeline start");
    } else {
        info!(pdf = %path.display(), "pipeline start");
    }

    let document = parse_document(path, config).await?;
    if !document.extraction_warnings.is_empty() {
        warn!(warnings = ?document.extraction_warnings, "extraction finished with warnings");
    }

    let location = locate::locate_eligibility_section(&document, Some(&client), config).await;
    let mut section_pages = location.pages(&document);
    if section_pages.iter().all(|p| p.text.trim().is_empty()) {
        warn!("located section has no text; using the full document");
        section_pages = document.pages.iter().collect();
    }

    let extracted =
        criteria::extract_criteria(client.as_ref(), config, &location, &section_pages).await?;
    let extracted = rank::rank_disqualifiers(extracted, config.top_n_disqualifiers);

    info!(
        pdf = %document.source_name,
        total_criteria = extracted.criteria.len(),
        top_disqualifiers = extracted.top_disqualifiers.len(),
        "pipeline complete"
    );
    Ok(extracted)
}

/// Screen a patient against pre-extracted criteria. Never errors: any
/// failure, including an unresolvable completion client, degrades to an
/// `Escalate` decision.
pub async fn run_screening_pipeline(
    request: &ScreeningRequest,
    extracted: &ExtractedCriteria,
    config: &ScreenConfig,
) -> ScreeningResult {
    match resolve_client(config) {
        Ok(client) => screen::screen_patient(Some(&client), config, request, extracted).await,
        Err(e) => {
            warn!(error = %e, "no completion client for screening");
            screen::screen_patient(None, config, request, extracted).await
        }
    }
}

/// Classify and extract the document on a blocking thread.
async fn parse_document(
    path: PathBuf,
    config: &ScreenConfig,
) -> Result<ParsedDocument, ScreenError> {
    let config = config.clone();
    let ocr: Arc<dyn OcrEngine> = match config.ocr {
        Some(ref engine) => Arc::clone(engine),
        None => Arc::new(TesseractCli::new(
            config.tesseract_cmd.as_deref().unwrap_or("tesseract"),
        )),
    };

    tokio::task::spawn_blocking(move || {
        let pdfium = Pdfium::default();
        let source = PdfiumSource::open(&pdfium, &path).map_err(|e| match e {
            PdfError::Encrypted { path } => ScreenError::EncryptedDocument { path },
            PdfError::Unreadable { path, detail } => ScreenError::UnreadablePdf { path, detail },
            PdfError::Page { page, detail } => ScreenError::UnreadablePdf {
                path: path.clone(),
                detail: format!("page {page}: {detail}"),
            },
        })?;
        let pdf_type = classify::classify(&source, config.ocr_quality_threshold);
        extract::extract_pages(&source, pdf_type, ocr.as_ref(), &config)
    })
    .await
    .map_err(|e| ScreenError::Internal(format!("document task panicked: {e}")))?
}
