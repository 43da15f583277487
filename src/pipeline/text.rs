//! Text acquisition: embedded text layer first, OCR when it is too sparse.
//!
//! The two paths are mutually exclusive. If the trimmed text layer is shorter
//! than [`crate::config::ExtractionConfig::ocr_threshold`] it is discarded and
//! the OCR output is used on its own. The threshold is only a proxy for "this
//! PDF is a scan"; it does not look at what the text says.
//!
//! Both extraction methods fail soft: errors are logged and surface as an
//! empty string so the caller can fall through to the next path. Only when
//! both come back empty does [`acquire_text`] return an error.

use crate::config::ExtractionConfig;
use crate::error::InvoiceError;
use crate::output::{ExtractedText, TextSource};
use crate::pipeline::{ocr, render};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Source of document text. Methods are blocking and must not panic.
pub trait TextExtractor: Send + Sync {
    /// Text layer of every page concatenated, or `""` on any failure.
    fn embedded_text(&self, path: &Path) -> String;

    /// OCR text of every page joined with newlines, or `""` on any failure.
    fn ocr_text(&self, path: &Path) -> String;
}

/// pdfium for the text layer and rasterisation, Tesseract for recognition.
#[derive(Debug, Clone)]
pub struct PdfiumTesseractExtractor {
    pub dpi: u32,
    pub language: String,
    pub password: Option<String>,
}

impl PdfiumTesseractExtractor {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            dpi: config.ocr_dpi,
            language: config.ocr_language.clone(),
            password: config.password.clone(),
        }
    }
}

impl TextExtractor for PdfiumTesseractExtractor {
    fn embedded_text(&self, path: &Path) -> String {
        match render::embedded_text_blocking(path, self.password.as_deref()) {
            Ok(text) => text,
            Err(e) => {
                warn!("Error reading PDF {}: {}", path.display(), e);
                String::new()
            }
        }
    }

    fn ocr_text(&self, path: &Path) -> String {
        match ocr::recognize_pdf(path, &self.language, self.dpi, self.password.as_deref()) {
            Ok(text) => text,
            Err(ocr::OcrError::Render(e)) => {
                warn!("Error rendering {} for OCR: {}", path.display(), e);
                String::new()
            }
            Err(e) => {
                warn!("Error during OCR for {}: {}", path.display(), e);
                String::new()
            }
        }
    }
}

/// Apply the selection policy with an already-chosen extractor.
///
/// `on_ocr_fallback` receives the trimmed character count of the discarded
/// text layer just before OCR starts.
pub fn acquire_text_blocking(
    extractor: &dyn TextExtractor,
    path: &Path,
    threshold: usize,
    on_ocr_fallback: impl FnOnce(usize),
) -> Result<ExtractedText, InvoiceError> {
    let embedded = extractor.embedded_text(path);
    let embedded_chars = embedded.trim().chars().count();

    let extracted = if embedded_chars >= threshold {
        ExtractedText {
            text: embedded,
            source: TextSource::Embedded,
        }
    } else {
        info!(
            "Embedded text too sparse ({} < {} chars), switching to OCR: {}",
            embedded_chars,
            threshold,
            path.display()
        );
        on_ocr_fallback(embedded_chars);
        ExtractedText {
            text: extractor.ocr_text(path),
            source: TextSource::Ocr,
        }
    };

    if extracted.text.trim().is_empty() {
        return Err(InvoiceError::TextAcquisitionFailed {
            path: path.to_path_buf(),
        });
    }

    Ok(extracted)
}

/// Async wrapper: runs [`acquire_text_blocking`] on the blocking thread pool.
pub async fn acquire_text(
    extractor: Arc<dyn TextExtractor>,
    path: PathBuf,
    threshold: usize,
    on_ocr_fallback: impl FnOnce(usize) + Send + 'static,
) -> Result<ExtractedText, InvoiceError> {
    tokio::task::spawn_blocking(move || {
        acquire_text_blocking(extractor.as_ref(), &path, threshold, on_ocr_fallback)
    })
    .await
    .map_err(|e| InvoiceError::Internal(format!("Text extraction task panicked: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeExtractor {
        embedded: String,
        ocr: String,
        ocr_calls: AtomicUsize,
    }

    impl FakeExtractor {
        fn new(embedded: &str, ocr: &str) -> Self {
            Self {
                embedded: embedded.to_string(),
                ocr: ocr.to_string(),
                ocr_calls: AtomicUsize::new(0),
            }
        }
    }

    impl TextExtractor for FakeExtractor {
        fn embedded_text(&self, _path: &Path) -> String {
            self.embedded.clone()
        }

        fn ocr_text(&self, _path: &Path) -> String {
            self.ocr_calls.fetch_add(1, Ordering::SeqCst);
            self.ocr.clone()
        }
    }

    fn acquire(fake: &FakeExtractor) -> Result<ExtractedText, InvoiceError> {
        acquire_text_blocking(fake, Path::new("inv.pdf"), 150, |_| {})
    }

    #[test]
    fn dense_text_layer_never_invokes_ocr() {
        let fake = FakeExtractor::new(&"x".repeat(150), "ocr text");
        let out = acquire(&fake).unwrap();
        assert_eq!(out.source, TextSource::Embedded);
        assert_eq!(fake.ocr_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn threshold_counts_trimmed_characters() {
        let padded = format!("   \n{}\n\n   ", "y".repeat(149));
        let fake = FakeExtractor::new(&padded, "from ocr");
        let out = acquire(&fake).unwrap();
        assert_eq!(out.source, TextSource::Ocr);
        assert_eq!(out.text, "from ocr");
        assert_eq!(fake.ocr_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sparse_text_is_replaced_not_merged() {
        let fake = FakeExtractor::new("Page 1", "TAX INVOICE\nQty 3\n");
        let out = acquire(&fake).unwrap();
        assert_eq!(out.text, "TAX INVOICE\nQty 3\n");
        assert!(!out.text.contains("Page 1"));
    }

    #[test]
    fn empty_text_layer_triggers_ocr() {
        let fake = FakeExtractor::new("", "scanned");
        let out = acquire(&fake).unwrap();
        assert_eq!(out.source, TextSource::Ocr);
    }

    #[test]
    fn both_empty_is_text_acquisition_failure() {
        let fake = FakeExtractor::new("  ", " \n ");
        let err = acquire(&fake).unwrap_err();
        assert!(matches!(err, InvoiceError::TextAcquisitionFailed { .. }));
    }

    #[test]
    fn fallback_hook_receives_embedded_length() {
        let fake = FakeExtractor::new(" abc ", "ocr");
        let mut seen = None;
        acquire_text_blocking(&fake, Path::new("inv.pdf"), 150, |n| seen = Some(n)).unwrap();
        assert_eq!(seen, Some(3));
    }

    #[test]
    fn custom_threshold_is_honoured() {
        let fake = FakeExtractor::new("short but enough", "ocr");
        let out = acquire_text_blocking(&fake, Path::new("inv.pdf"), 10, |_| {}).unwrap();
        assert_eq!(out.source, TextSource::Embedded);
        assert_eq!(fake.ocr_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn async_wrapper_runs_on_blocking_pool() {
        let fake: Arc<dyn TextExtractor> = Arc::new(FakeExtractor::new("", "ocr body"));
        let out = acquire_text(fake, PathBuf::from("inv.pdf"), 150, |_| {})
            .await
            .unwrap();
        assert_eq!(out.text, "ocr body");
    }
}
