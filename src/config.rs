//! Configuration for protocol processing and patient screening.
//!
//! All pipeline behaviour is controlled through [`ScreenConfig`], built via
//! its [`ScreenConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across runs and to diff two runs to understand
//! why their outputs differ.
//!
//! The completion client and OCR engine are injectable: tests substitute
//! deterministic stubs, production resolves real implementations from the
//! environment. Neither is a global — each pipeline run is handed exactly the
//! collaborators its config names.

use crate::error::ScreenError;
use crate::llm::CompletionClient;
use crate::ocr::OcrEngine;
use std::fmt;
use std::sync::Arc;

/// Configuration for a protocol-processing or screening run.
///
/// Built via [`ScreenConfig::builder()`] or [`ScreenConfig::default()`].
///
/// # Example
/// ```rust
/// use trialscreen::ScreenConfig;
///
/// let config = ScreenConfig::builder()
///     .ocr_quality_threshold(150)
///     .top_n_disqualifiers(5)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ScreenConfig {
    /// Characters of native text per page below which that page falls back to
    /// OCR. Default: 100.
    ///
    /// Real protocols interleave clean text pages with scanned exhibits, so
    /// the threshold is applied per page, not per document. 100 chars is low
    /// enough that a page of running prose always passes, and high enough
    /// that a page carrying only a header or a page number gets OCR'd.
    pub ocr_quality_threshold: usize,

    /// Longest-edge pixel size for pages rasterised for OCR. Default: 2480
    /// (roughly A4 at 300 DPI — the resolution Tesseract is tuned for).
    pub ocr_render_pixels: u32,

    /// How many ranked exclusion criteria gate the fast pre-screen. Default: 8.
    pub top_n_disqualifiers: usize,

    /// Allow the section locator's model-assisted third pass. Default: true.
    ///
    /// Disable for fully offline runs; the locator then falls back to its
    /// best deterministic candidate or the whole document.
    pub llm_section_fallback: bool,

    /// Completion model identifier, e.g. "claude-sonnet-4-20250514".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// Completion provider name (e.g. "anthropic", "openai").
    /// If None along with `completion`, the provider is auto-detected from
    /// environment API keys.
    pub provider_name: Option<String>,

    /// Pre-constructed completion client. Takes precedence over
    /// `provider_name` — this is the injection point for tests.
    pub completion: Option<Arc<dyn CompletionClient>>,

    /// Pre-constructed OCR engine. If None, the tesseract CLI is used.
    pub ocr: Option<Arc<dyn OcrEngine>>,

    /// Path to the tesseract binary when it is not on $PATH.
    pub tesseract_cmd: Option<String>,

    /// Total completion attempts per retryable call (first try included).
    /// Default: 3.
    pub max_attempts: u32,

    /// Exponential backoff bounds between completion attempts, in seconds.
    /// The delay doubles per attempt and is clamped to [base, cap].
    /// Defaults: 2 and 10.
    pub retry_base_secs: u64,
    pub retry_cap_secs: u64,

    /// Maximum tokens the model may generate for the extraction call.
    /// Default: 8192 — a dense criteria section can run past 4K output tokens
    /// and truncation here silently loses criteria.
    pub max_tokens: usize,

    /// Sampling temperature. Default: 0.1 — extraction and screening both
    /// want the model faithful, not creative.
    pub temperature: f32,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            ocr_quality_threshold: 100,
            ocr_render_pixels: 2480,
            top_n_disqualifiers: 8,
            llm_section_fallback: true,
            model: None,
            provider_name: None,
            completion: None,
            ocr: None,
            tesseract_cmd: None,
            max_attempts: 3,
            retry_base_secs: 2,
            retry_cap_secs: 10,
            max_tokens: 8192,
            temperature: 0.1,
        }
    }
}

impl fmt::Debug for ScreenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScreenConfig")
            .field("ocr_quality_threshold", &self.ocr_quality_threshold)
            .field("ocr_render_pixels", &self.ocr_render_pixels)
            .field("top_n_disqualifiers", &self.top_n_disqualifiers)
            .field("llm_section_fallback", &self.llm_section_fallback)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field(
                "completion",
                &self.completion.as_ref().map(|_| "<dyn CompletionClient>"),
            )
            .field("ocr", &self.ocr.as_ref().map(|_| "<dyn OcrEngine>"))
            .field("tesseract_cmd", &self.tesseract_cmd)
            .field("max_attempts", &self.max_attempts)
            .field("retry_base_secs", &self.retry_base_secs)
            .field("retry_cap_secs", &self.retry_cap_secs)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl ScreenConfig {
    /// Create a new builder for `ScreenConfig`.
    pub fn builder() -> ScreenConfigBuilder {
        ScreenConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ScreenConfig`].
#[derive(Debug)]
pub struct ScreenConfigBuilder {
    config: ScreenConfig,
}

impl ScreenConfigBuilder {
    pub fn ocr_quality_threshold(mut self, chars: usize) -> Self {
        self.config.ocr_quality_threshold = chars.max(1);
        self
    }

    pub fn ocr_render_pixels(mut self, px: u32) -> Self {
        self.config.ocr_render_pixels = px.max(100);
        self
    }

    pub fn top_n_disqualifiers(mut self, n: usize) -> Self {
        self.config.top_n_disqualifiers = n.max(1);
        self
    }

    pub fn llm_section_fallback(mut self, v: bool) -> Self {
        self.config.llm_section_fallback = v;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn completion_client(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.config.completion = Some(client);
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr = Some(engine);
        self
    }

    pub fn tesseract_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.config.tesseract_cmd = Some(cmd.into());
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn retry_bounds_secs(mut self, base: u64, cap: u64) -> Self {
        self.config.retry_base_secs = base;
        self.config.retry_cap_secs = cap;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ScreenConfig, ScreenError> {
        let c = &self.config;
        if c.retry_base_secs > c.retry_cap_secs {
            return Err(ScreenError::InvalidConfig(format!(
                "retry base {}s exceeds cap {}s",
                c.retry_base_secs, c.retry_cap_secs
            )));
        }
        if c.max_attempts == 0 {
            return Err(ScreenError::InvalidConfig("max_attempts must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}
