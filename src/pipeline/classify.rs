//! Document classification: decide how a protocol PDF must be read before
//! doing any heavy extraction work.
//!
//! Classification never fails. A document that cannot be opened is simply
//! `Unknown`; the extractor decides what to do about it.

use crate::model::PdfType;
use crate::pdf::{PdfError, PdfSource, PdfiumSource};
use pdfium_render::prelude::Pdfium;
use std::path::Path;
use tracing::{info, warn};

/// How many pages to sample. Protocols run to hundreds of pages; sampling a
/// fixed number keeps classification O(1) in document size.
const SAMPLE_PAGES: usize = 10;

/// Classify an open document by sampling page text density.
///
/// Every sampled page with at least `ocr_quality_threshold` chars of native
/// text counts as good. All good → `Text`, all bad → `Scanned`, mixed →
/// `Hybrid`. An unreadable page counts as bad rather than aborting.
pub fn classify(source: &dyn PdfSource, ocr_quality_threshold: usize) -> PdfType {
    if source.is_encrypted() {
        info!(pdf = source.source_name(), "document is encrypted");
        return PdfType::Encrypted;
    }

    let total = source.page_count();
    if total == 0 {
        return PdfType::Unknown;
    }

    let indices = sample_indices(total, SAMPLE_PAGES);
    let mut good = 0usize;
    let mut bad = 0usize;
    for &idx in &indices {
        let chars = source
            .page_text(idx)
            .map(|t| t.trim().chars().count())
            .unwrap_or(0);
        if chars >= ocr_quality_threshold {
            good += 1;
        } else {
            bad += 1;
        }
    }

    let pdf_type = if bad == 0 {
        PdfType::Text
    } else if good == 0 {
        PdfType::Scanned
    } else {
        PdfType::Hybrid
    };

    info!(
        pdf = source.source_name(),
        ?pdf_type,
        sampled = indices.len(),
        good,
        bad,
        "classified"
    );
    pdf_type
}

/// Classify a PDF file directly, without the caller managing pdfium.
///
/// Opening failures map to a label instead of an error: password-protected
/// files are `Encrypted`, anything else unopenable (missing file, corrupt
/// bytes, no pdfium library) is `Unknown`. This runs pdfium on the calling
/// thread; inside an async context, wrap it in `spawn_blocking`.
pub fn classify_path(path: &Path, ocr_quality_threshold: usize) -> PdfType {
    let bindings = match Pdfium::bind_to_system_library() {
        Ok(bindings) => bindings,
        Err(e) => {
            warn!(error = ?e, "pdfium unavailable; cannot classify");
            return PdfType::Unknown;
        }
    };
    let pdfium = Pdfium::new(bindings);
    let pdf_type = match PdfiumSource::open(&pdfium, path) {
        Ok(source) => classify(&source, ocr_quality_threshold),
        Err(PdfError::Encrypted { .. }) => PdfType::Encrypted,
        Err(e) => {
            warn!(pdf = %path.display(), error = %e, "cannot open for classification");
            PdfType::Unknown
        }
    };
    pdf_type
}

/// Up to `n` evenly spaced 0-based page indices; all pages when `total <= n`.
fn sample_indices(total: usize, n: usize) -> Vec<usize> {
    if total <= n {
        return (0..total).collect();
    }
    let step = total as f64 / n as f64;
    (0..n).map(|i| (i as f64 * step) as usize).collect()
}
