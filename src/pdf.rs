//! PDF access boundary: the [`PdfSource`] trait and its pdfium-backed
//! implementation.
//!
//! pdfium wraps a C++ library with thread-local state, so a [`PdfiumSource`]
//! must be created and used on one thread. The orchestrator does all PDF work
//! inside a single `spawn_blocking` closure; the trait exists so the
//! classifier and extractor can be tested against in-memory stubs without a
//! pdfium binary present.

use image::DynamicImage;
use pdfium_render::prelude::*;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("PDF '{path}' is password-protected")]
    Encrypted { path: PathBuf },

    #[error("cannot open PDF '{path}': {detail}")]
    Unreadable { path: PathBuf, detail: String },

    #[error("page {page}: {detail}")]
    Page { page: usize, detail: String },
}

/// Read-only access to a loaded PDF document.
///
/// Page indices are 0-based here; the rest of the pipeline reports 1-based
/// page numbers.
pub trait PdfSource {
    fn source_name(&self) -> &str;

    /// True when the document is password-protected and unreadable.
    fn is_encrypted(&self) -> bool;

    fn page_count(&self) -> usize;

    /// Native text layer of one page. Empty string for image-only pages.
    fn page_text(&self, index: usize) -> Result<String, PdfError>;

    /// Rasterize one page with the longest edge capped at `max_pixels`.
    fn render_page(&self, index: usize, max_pixels: u32) -> Result<DynamicImage, PdfError>;
}

/// Production [`PdfSource`] over `pdfium-render`.
///
/// Borrows the `Pdfium` instance, which keeps all pdfium calls on the thread
/// that created it.
pub struct PdfiumSource<'a> {
    document: PdfDocument<'a>,
    name: String,
}

impl<'a> PdfiumSource<'a> {
    /// Open a PDF file. Password-protected files fail with
    /// [`PdfError::Encrypted`]; anything else unopenable with
    /// [`PdfError::Unreadable`].
    pub fn open(pdfium: &'a Pdfium, path: &Path) -> Result<Self, PdfError> {
        let document = pdfium.load_pdf_from_file(path, None).map_err(|e| {
            let detail = format!("{e:?}");
            if detail.contains("Password") || detail.contains("password") {
                PdfError::Encrypted {
                    path: path.to_path_buf(),
                }
            } else {
                PdfError::Unreadable {
                    path: path.to_path_buf(),
                    detail,
                }
            }
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        debug!(pdf = %name, pages = document.pages().len(), "PDF opened");

        Ok(Self { document, name })
    }
}

impl PdfSource for PdfiumSource<'_> {
    fn source_name(&self) -> &str {
        &self.name
    }

    fn is_encrypted(&self) -> bool {
        // Encrypted files never get this far; open() already rejected them.
        false
    }

    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn page_text(&self, index: usize) -> Result<String, PdfError> {
        let page = self
            .document
            .pages()
            .get(index as u16)
            .map_err(|e| PdfError::Page {
                page: index + 1,
                detail: format!("{e:?}"),
            })?;
        let text = page.text().map_err(|e| PdfError::Page {
            page: index + 1,
            detail: format!("{e:?}"),
        })?;
        Ok(text.all())
    }

    fn render_page(&self, index: usize, max_pixels: u32) -> Result<DynamicImage, PdfError> {
        let page = self
            .document
            .pages()
            .get(index as u16)
            .map_err(|e| PdfError::Page {
                page: index + 1,
                detail: format!("{e:?}"),
            })?;
        let render_config = PdfRenderConfig::new()
            .set_target_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| PdfError::Page {
                page: index + 1,
                detail: format!("{e:?}"),
            })?;
        Ok(bitmap.as_image())
    }
}

/// SHA-256 of the file bytes, hex-encoded.
///
/// Used as the stable protocol identifier: re-submitting the same PDF yields
/// the same id no matter what the file is called.
pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
