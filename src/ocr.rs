//! OCR boundary: the [`OcrEngine`] trait and a Tesseract-CLI implementation.
//!
//! The engine is synchronous on purpose. OCR is CPU-bound work that the
//! orchestrator already runs inside `spawn_blocking` alongside pdfium, so an
//! async trait here would only add noise.

use image::DynamicImage;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to write page image for OCR: {0}")]
    ImageWrite(String),

    #[error("tesseract invocation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("tesseract exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// One recognized word with its confidence in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f32,
}

/// The words recognized on one page image, in reading order.
#[derive(Debug, Clone, Default)]
pub struct RecognizedText {
    pub words: Vec<OcrWord>,
}

impl RecognizedText {
    /// Words joined with single spaces.
    pub fn text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Mean per-word confidence, or 0.0 when nothing was recognized.
    pub fn mean_confidence(&self) -> f32 {
        if self.words.is_empty() {
            return 0.0;
        }
        self.words.iter().map(|w| w.confidence).sum::<f32>() / self.words.len() as f32
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| w.text.trim().is_empty())
    }
}

/// Recognizes text in a rasterized page.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> Result<RecognizedText, OcrError>;
}

/// [`OcrEngine`] that shells out to the `tesseract` binary with TSV output.
///
/// TSV is the only tesseract output mode that carries per-word confidences,
/// which the extractor turns into page-level confidence scores.
pub struct TesseractCli {
    command: PathBuf,
}

impl TesseractCli {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, image: &DynamicImage) -> Result<RecognizedText, OcrError> {
        let tmp = tempfile::Builder::new()
            .prefix("trialscreen-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrError::ImageWrite(format!("tempfile: {e}")))?;
        image
            .save_with_format(tmp.path(), image::ImageFormat::Png)
            .map_err(|e| OcrError::ImageWrite(format!("{e}")))?;

        let output = Command::new(&self.command)
            .arg(tmp.path())
            .arg("stdout")
            .arg("tsv")
            .output()?;

        if !output.status.success() {
            return Err(OcrError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let recognized = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!(
            words = recognized.words.len(),
            confidence = recognized.mean_confidence(),
            "tesseract page done"
        );
        Ok(recognized)
    }
}

/// Parse tesseract TSV output into recognized words.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num, left,
/// top, width, height, conf, text. Word rows have conf >= 0; structural rows
/// (page/block/line) carry conf -1 and are skipped, as are blank words.
fn parse_tsv(tsv: &str) -> RecognizedText {
    let mut words = Vec::new();
    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let conf: f32 = match cols[10].parse() {
            Ok(c) => c,
            Err(_) => continue,
        };
        let text = cols[11].trim();
        if conf < 0.0 || text.is_empty() {
            continue;
        }
        words.push(OcrWord {
            text: text.to_string(),
            confidence: conf / 100.0,
        });
    }
    RecognizedText { words }
}
