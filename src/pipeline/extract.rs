//! Adaptive text extraction: native text where the page has it, OCR where it
//! does not.
//!
//! The per-page decision (rather than per-document) matters for real
//! protocols, which routinely mix born-digital pages with scanned appendices
//! and signature pages.

use crate::config::ScreenConfig;
use crate::error::ScreenError;
use crate::model::{PageText, ParsedDocument, PdfType};
use crate::ocr::OcrEngine;
use crate::pdf::PdfSource;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Extract every page of `source` into a [`ParsedDocument`].
///
/// Pages whose native text meets `ocr_quality_threshold` are taken verbatim
/// with confidence 1.0. Everything else is rasterized and OCR'd. An OCR
/// failure produces an empty page with confidence 0.0 plus a warning naming
/// the page; the extraction as a whole still succeeds.
///
/// `Encrypted` input is the one fatal case: there is nothing to extract.
pub fn extract_pages(
    source: &dyn PdfSource,
    pdf_type: PdfType,
    ocr: &dyn OcrEngine,
    config: &ScreenConfig,
) -> Result<ParsedDocument, ScreenError> {
    if pdf_type == PdfType::Encrypted {
        return Err(ScreenError::EncryptedDocument {
            path: PathBuf::from(source.source_name()),
        });
    }

    let total = source.page_count();
    let mut pages = Vec::with_capacity(total);
    let mut warnings = Vec::new();

    for index in 0..total {
        let page_number = index + 1;
        let native = source
            .page_text(index)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();

        if native.chars().count() >= config.ocr_quality_threshold {
            pages.push(PageText {
                page_number,
                char_count: native.chars().count(),
                text: native,
                ocr_used: false,
                confidence: 1.0,
            });
            continue;
        }

        debug!(
            page = page_number,
            native_chars = native.chars().count(),
            "falling back to OCR"
        );
        match ocr_page(source, index, ocr, config) {
            Some(page) => pages.push(page),
            None => {
                warnings.push(format!("Page {page_number}: OCR produced no usable text."));
                pages.push(PageText {
                    page_number,
                    text: String::new(),
                    char_count: 0,
                    ocr_used: true,
                    confidence: 0.0,
                });
            }
        }
    }

    let document = ParsedDocument {
        source_name: source.source_name().to_string(),
        pdf_type,
        total_pages: pages.len(),
        pages,
        extraction_warnings: warnings,
    };
    info!(
        pdf = %document.source_name,
        total_pages = document.total_pages,
        ocr_pages = document.pages.iter().filter(|p| p.ocr_used).count(),
        warnings = document.extraction_warnings.len(),
        "extraction done"
    );
    Ok(document)
}

/// Render one page and OCR it. `None` means no usable text came back, for
/// whatever reason; the caller records the warning.
fn ocr_page(
    source: &dyn PdfSource,
    index: usize,
    ocr: &dyn OcrEngine,
    config: &ScreenConfig,
) -> Option<PageText> {
    let image = match source.render_page(index, config.ocr_render_pixels) {
        Ok(img) => img,
        Err(e) => {
            warn!(page = index + 1, error = %e, "page render failed");
            return None;
        }
    };
    let recognized = match ocr.recognize(&image) {
        Ok(r) => r,
        Err(e) => {
            warn!(page = index + 1, error = %e, "OCR failed");
            return None;
        }
    };
    if recognized.is_empty() {
        return None;
    }
    let text = recognized.text();
    Some(PageText {
        page_number: index + 1,
        char_count: text.chars().count(),
        confidence: recognized.mean_confidence(),
        text,
        ocr_used: true,
    })
}
