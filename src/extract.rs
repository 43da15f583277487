//! Extraction entry points: one document, a batch, or a batch straight to xlsx.
//!
//! ## Why sequential?
//!
//! Every document costs one paid model call and, for scans, seconds of OCR per
//! page. Running them one at a time keeps the request rate predictable and
//! makes "stop at the first failure" meaningful. Use
//! [`crate::stream::extract_stream`] to observe documents as they finish.
//!
//! ## Failure isolation
//!
//! A failing document never takes the batch result down with it: its error is
//! stored as a [`DocumentFailure`] next to the successful outputs. Only
//! configuration problems detected before the first document (e.g. no API
//! key) are returned as `Err`.

use crate::config::{BatchPolicy, ExtractionConfig};
use crate::error::{DocumentFailure, InvoiceError};
use crate::export::{self, ExportSummary};
use crate::output::{BatchOutput, BatchStats, DocumentOutput, TextSource};
use crate::pipeline::model::{GeminiClient, InvoiceModel};
use crate::pipeline::text::{self, PdfiumTesseractExtractor, TextExtractor};
use crate::pipeline::{flatten, input};
use crate::progress::DocumentStage;
use crate::prompts;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Extract the rows of a single invoice PDF.
///
/// # Errors
/// Any [`InvoiceError`] from validation, text acquisition, the model call or
/// response parsing. A missing API key is reported before the file is read.
///
/// # Example
/// ```rust,no_run
/// use edgequake_invoice2xlsx::{extract_invoice, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::builder()
///     .api_key(std::env::var("GEMINI_API_KEY")?)
///     .build()?;
/// let doc = extract_invoice("invoice.pdf", &config).await?;
/// println!("{} rows via {:?}", doc.rows.len(), doc.text_source);
/// # Ok(())
/// # }
/// ```
pub async fn extract_invoice(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<DocumentOutput, InvoiceError> {
    let pipeline = Pipeline::new(config)?;
    pipeline.run_document(path.as_ref(), 1, 1).await
}

/// Extract every document in `paths`, in order.
///
/// With [`BatchPolicy::HaltOnError`] the batch stops after the first failure;
/// with [`BatchPolicy::ContinueOnError`] every document is attempted.
pub async fn extract_batch<P: AsRef<Path>>(
    paths: &[P],
    config: &ExtractionConfig,
) -> Result<BatchOutput, InvoiceError> {
    let batch_start = Instant::now();
    let pipeline = Pipeline::new(config)?;
    let total = paths.len();
    info!("Starting batch of {} documents", total);

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    let mut documents = Vec::new();
    let mut failures = Vec::new();
    let mut attempted = 0;

    for (i, path) in paths.iter().enumerate() {
        let path = path.as_ref();
        attempted += 1;
        match pipeline.run_document(path, i + 1, total).await {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                failures.push(DocumentFailure::new(path, &e));
                if config.batch_policy == BatchPolicy::HaltOnError {
                    warn!(
                        "Processing stopped due to an error ({} of {} documents not attempted)",
                        total - attempted,
                        total
                    );
                    break;
                }
            }
        }
    }

    let stats = BatchStats {
        total_documents: total,
        attempted,
        succeeded: documents.len(),
        failed: failures.len(),
        ocr_documents: documents
            .iter()
            .filter(|d| d.text_source == TextSource::Ocr)
            .count(),
        total_rows: documents.iter().map(|d| d.rows.len()).sum(),
        total_duration_ms: batch_start.elapsed().as_millis() as u64,
    };

    info!(
        "Batch complete: {}/{} documents, {} rows, {}ms",
        stats.succeeded, total, stats.total_rows, stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(stats.attempted, stats.succeeded, stats.total_rows);
    }

    Ok(BatchOutput {
        documents,
        failures,
        stats,
    })
}

/// Run a batch and append its rows to the workbook at `output_path`.
///
/// Nothing is exported when the batch halted on a failure or produced no
/// rows; the export result is `Ok(None)` in both cases. Under
/// [`BatchPolicy::ContinueOnError`] the rows of successful documents are
/// exported even if others failed.
///
/// # Returns
/// - `Err(InvoiceError)`: configuration error before any document ran
/// - `Ok((batch, export))`: the batch is always returned, so its rows can be
///   saved again when `export` is an [`InvoiceError::ExportFailed`]
pub async fn extract_batch_to_xlsx<P: AsRef<Path>>(
    paths: &[P],
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<(BatchOutput, Result<Option<ExportSummary>, InvoiceError>), InvoiceError> {
    let batch = extract_batch(paths, config).await?;

    let halted_on_error =
        config.batch_policy == BatchPolicy::HaltOnError && !batch.failures.is_empty();
    if halted_on_error {
        warn!("Not exporting: batch stopped on a failed document");
        return Ok((batch, Ok(None)));
    }
    if batch.stats.total_rows == 0 {
        info!("Could not extract any data from the files; nothing to export");
        return Ok((batch, Ok(None)));
    }

    let rows: Vec<_> = batch.rows().cloned().collect();
    let output_path = output_path.as_ref().to_path_buf();
    let export = tokio::task::spawn_blocking(move || export::save_rows(&output_path, &rows))
        .await
        .map_err(|e| InvoiceError::Internal(format!("Export task panicked: {}", e)))
        .and_then(|saved| saved.map(Some));
    if let Err(ref e) = export {
        warn!("Export failed, {} rows kept in memory: {}", batch.stats.total_rows, e);
    }

    Ok((batch, export))
}

/// Synchronous wrapper around [`extract_invoice`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<DocumentOutput, InvoiceError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| InvoiceError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_invoice(path, config))
}

/// Extract an invoice held in memory.
///
/// The bytes are written to a managed temp file that is removed on return;
/// `DocumentOutput::path` therefore names a file that no longer exists.
pub async fn extract_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<DocumentOutput, InvoiceError> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| InvoiceError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| InvoiceError::Internal(format!("tempfile write: {e}")))?;
    extract_invoice(tmp.path(), config).await
}

// ── Per-document pipeline ────────────────────────────────────────────────

/// Resolved collaborators for one run.
pub(crate) struct Pipeline {
    config: ExtractionConfig,
    model: Arc<dyn InvoiceModel>,
    extractor: Arc<dyn TextExtractor>,
}

impl Pipeline {
    /// Resolve the model client and text extractor.
    ///
    /// Without an injected client, a blank API key fails here, before any
    /// document is opened.
    pub(crate) fn new(config: &ExtractionConfig) -> Result<Self, InvoiceError> {
        let model: Arc<dyn InvoiceModel> = match config.model_client {
            Some(ref client) => Arc::clone(client),
            None => {
                if config.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
                    return Err(InvoiceError::MissingCredential);
                }
                Arc::new(GeminiClient::from_config(config)?)
            }
        };

        let extractor: Arc<dyn TextExtractor> = match config.text_extractor {
            Some(ref e) => Arc::clone(e),
            None => Arc::new(PdfiumTesseractExtractor::from_config(config)),
        };

        Ok(Self {
            config: config.clone(),
            model,
            extractor,
        })
    }

    pub(crate) fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// [`Self::process_document`] plus completion/error callbacks.
    pub(crate) async fn run_document(
        &self,
        path: &Path,
        index: usize,
        total: usize,
    ) -> Result<DocumentOutput, InvoiceError> {
        let result = self.process_document(path, index, total).await;
        if let Some(ref cb) = self.config.progress_callback {
            match &result {
                Ok(doc) => cb.on_document_complete(index, total, doc.rows.len()),
                Err(e) => cb.on_document_error(index, total, &e.to_string()),
            }
        }
        match &result {
            Ok(doc) => info!(
                "[{}/{}] {}: {} rows in {}ms",
                index,
                total,
                path.display(),
                doc.rows.len(),
                doc.duration_ms
            ),
            Err(e) => warn!("[{}/{}] {}: {}", index, total, path.display(), e),
        }
        result
    }

    async fn process_document(
        &self,
        path: &Path,
        index: usize,
        total: usize,
    ) -> Result<DocumentOutput, InvoiceError> {
        let start = Instant::now();
        let cb = self.config.progress_callback.clone();
        if let Some(ref cb) = cb {
            cb.on_document_start(index, total, path);
        }

        // ── Step 1: Validate input ───────────────────────────────────────
        let pdf_path: PathBuf = input::validate_pdf(path)?;

        // ── Step 2: Acquire text ─────────────────────────────────────────
        self.stage(index, total, DocumentStage::ReadingText);
        let fallback_cb = cb.clone();
        let extracted = text::acquire_text(
            Arc::clone(&self.extractor),
            pdf_path.clone(),
            self.config.ocr_threshold,
            move |embedded_chars| {
                if let Some(cb) = fallback_cb {
                    cb.on_document_stage(
                        index,
                        total,
                        DocumentStage::OcrFallback { embedded_chars },
                    );
                }
            },
        )
        .await?;
        let text_chars = extracted.text.chars().count();

        // ── Step 3: Query the model ──────────────────────────────────────
        let prompt = prompts::build_prompt(&extracted.text, self.config.prompt_override.as_deref());
        self.stage(index, total, DocumentStage::QueryingModel);
        let invoice = self.model.extract(&prompt).await?;

        // ── Step 4: Flatten ──────────────────────────────────────────────
        self.stage(index, total, DocumentStage::Flattening);
        let line_items = invoice.line_items().len();
        let rows = flatten::flatten(&invoice, self.config.row_policy);

        Ok(DocumentOutput {
            path: pdf_path,
            text_source: extracted.source,
            text_chars,
            line_items,
            rows,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn stage(&self, index: usize, total: usize, stage: DocumentStage) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_stage(index, total, stage);
        }
    }
}
