//! Configuration types for invoice extraction.
//!
//! Every knob lives in [`ExtractionConfig`], built through
//! [`ExtractionConfigBuilder`]. The OCR trigger threshold and the rasterisation
//! DPI are untuned heuristics, so both are plain fields rather than constants.

use crate::error::InvoiceError;
use crate::pipeline::model::InvoiceModel;
use crate::pipeline::text::TextExtractor;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default Gemini model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Default base URL of the Generative Language API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Configuration for invoice extraction.
///
/// # Example
/// ```rust
/// use edgequake_invoice2xlsx::{BatchPolicy, ExtractionConfig};
///
/// let config = ExtractionConfig::builder()
///     .api_key("AIza...")
///     .ocr_threshold(200)
///     .batch_policy(BatchPolicy::ContinueOnError)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Gemini API key. Required before any model call; never persisted.
    pub api_key: Option<String>,

    /// Gemini model identifier. Default: `gemini-2.0-flash`.
    pub model: String,

    /// API base URL, without trailing slash. Default: the public Google endpoint.
    pub base_url: String,

    /// Sampling temperature sent in `generationConfig`. Default: 0.1.
    pub temperature: f32,

    /// Per-request timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Retries on transient connectivity errors. Default: 0 (single attempt).
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Minimum trimmed length of the embedded text layer below which OCR runs
    /// instead. Default: 150 characters.
    pub ocr_threshold: usize,

    /// Rasterisation resolution for OCR. Range: 72–600. Default: 300.
    pub ocr_dpi: u32,

    /// Tesseract language code(s), e.g. `"eng"` or `"eng+hin"`. Default: `"eng"`.
    pub ocr_language: String,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Replacement for the built-in instruction block. The schema and the
    /// invoice text are always appended.
    pub prompt_override: Option<String>,

    /// What to emit for a document without line items. Default: one empty row.
    pub row_policy: RowPolicy,

    /// Whether a failed document stops the batch. Default: halt.
    pub batch_policy: BatchPolicy,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,

    /// Pre-constructed model client. Takes precedence over the Gemini settings.
    pub model_client: Option<Arc<dyn InvoiceModel>>,

    /// Pre-constructed text extractor. Default: pdfium + Tesseract.
    pub text_extractor: Option<Arc<dyn TextExtractor>>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.1,
            api_timeout_secs: 120,
            max_retries: 0,
            retry_backoff_ms: 1000,
            ocr_threshold: 150,
            ocr_dpi: 300,
            ocr_language: "eng".to_string(),
            password: None,
            prompt_override: None,
            row_policy: RowPolicy::default(),
            batch_policy: BatchPolicy::default(),
            progress_callback: None,
            model_client: None,
            text_extractor: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("ocr_threshold", &self.ocr_threshold)
            .field("ocr_dpi", &self.ocr_dpi)
            .field("ocr_language", &self.ocr_language)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("row_policy", &self.row_policy)
            .field("batch_policy", &self.batch_policy)
            .field(
                "model_client",
                &self.model_client.as_ref().map(|_| "<dyn InvoiceModel>"),
            )
            .field(
                "text_extractor",
                &self.text_extractor.as_ref().map(|_| "<dyn TextExtractor>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn ocr_threshold(mut self, chars: usize) -> Self {
        self.config.ocr_threshold = chars;
        self
    }

    pub fn ocr_dpi(mut self, dpi: u32) -> Self {
        self.config.ocr_dpi = dpi;
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn prompt_override(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt_override = Some(prompt.into());
        self
    }

    pub fn row_policy(mut self, policy: RowPolicy) -> Self {
        self.config.row_policy = policy;
        self
    }

    pub fn batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.config.batch_policy = policy;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn model_client(mut self, client: Arc<dyn InvoiceModel>) -> Self {
        self.config.model_client = Some(client);
        self
    }

    pub fn text_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.config.text_extractor = Some(extractor);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// A missing API key is *not* a build error: it is reported per document
    /// by the model client, before any request is sent.
    pub fn build(self) -> Result<ExtractionConfig, InvoiceError> {
        let c = &self.config;
        if c.ocr_dpi < 72 || c.ocr_dpi > 600 {
            return Err(InvoiceError::InvalidConfig(format!(
                "OCR DPI must be 72–600, got {}",
                c.ocr_dpi
            )));
        }
        if c.ocr_language.trim().is_empty() {
            return Err(InvoiceError::InvalidConfig(
                "OCR language must not be empty".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(InvoiceError::InvalidConfig("Model must not be empty".into()));
        }
        if !c.base_url.starts_with("http://") && !c.base_url.starts_with("https://") {
            return Err(InvoiceError::InvalidConfig(format!(
                "Base URL must be http(s), got '{}'",
                c.base_url
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Row emission for a document whose model output has no line items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RowPolicy {
    /// Emit exactly one row with every line-item column unset. (default)
    #[default]
    SynthesizeEmpty,
    /// Emit no rows for the document.
    SkipDocument,
}

/// Batch behaviour after a document fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchPolicy {
    /// Stop at the first failing document. (default)
    #[default]
    HaltOnError,
    /// Record the failure and move on to the next document.
    ContinueOnError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_heuristics() {
        let c = ExtractionConfig::default();
        assert_eq!(c.ocr_threshold, 150);
        assert_eq!(c.ocr_dpi, 300);
        assert_eq!(c.ocr_language, "eng");
        assert_eq!(c.temperature, 0.1);
        assert_eq!(c.max_retries, 0);
        assert_eq!(c.model, "gemini-2.0-flash");
        assert_eq!(c.row_policy, RowPolicy::SynthesizeEmpty);
        assert_eq!(c.batch_policy, BatchPolicy::HaltOnError);
    }

    #[test]
    fn builder_rejects_out_of_range_dpi() {
        let err = ExtractionConfig::builder().ocr_dpi(20).build().unwrap_err();
        assert!(err.to_string().contains("DPI"), "got: {err}");
    }

    #[test]
    fn builder_rejects_non_http_base_url() {
        assert!(ExtractionConfig::builder()
            .base_url("ftp://example.com")
            .build()
            .is_err());
    }

    #[test]
    fn builder_trims_trailing_slash() {
        let c = ExtractionConfig::builder()
            .base_url("http://127.0.0.1:8080/")
            .build()
            .unwrap();
        assert_eq!(c.base_url, "http://127.0.0.1:8080");
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = ExtractionConfig::builder()
            .api_key("AIzaSecretValue")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("AIzaSecretValue"));
        assert!(dbg.contains("<redacted>"));
    }
}
