//! Progress-callback trait for per-document extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the batch walks through its files. The pipeline itself never
//! prints; a terminal progress bar, a GUI log pane or a message queue are all
//! just implementations of this trait.
//!
//! # Example
//!
//! ```rust
//! use edgequake_invoice2xlsx::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct RowCounter {
//!     rows: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for RowCounter {
//!     fn on_document_complete(&self, index: usize, total: usize, rows: usize) {
//!         let so_far = self.rows.fetch_add(rows, Ordering::SeqCst) + rows;
//!         eprintln!("[{}/{}] {} rows so far", index, total, so_far);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(RowCounter { rows: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// A step inside the processing of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStage {
    /// Reading the embedded text layer.
    ReadingText,
    /// Embedded text was too sparse; running OCR. Carries the trimmed length
    /// of the discarded embedded text.
    OcrFallback { embedded_chars: usize },
    /// Waiting for the model.
    QueryingModel,
    /// Turning the model output into rows.
    Flattening,
}

/// Called by the orchestrator as it processes a batch.
///
/// `index` is 1-based. All methods default to no-ops. Documents are processed
/// sequentially, but the callback may be invoked from a blocking worker thread,
/// hence `Send + Sync`.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before the first document.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when work on a document begins.
    fn on_document_start(&self, index: usize, total: usize, path: &Path) {
        let _ = (index, total, path);
    }

    /// Called as a document moves between pipeline stages.
    fn on_document_stage(&self, index: usize, total: usize, stage: DocumentStage) {
        let _ = (index, total, stage);
    }

    /// Called when a document produced its rows.
    fn on_document_complete(&self, index: usize, total: usize, rows: usize) {
        let _ = (index, total, rows);
    }

    /// Called when a document failed.
    fn on_document_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after the batch ends, whether or not it halted early.
    fn on_batch_complete(&self, attempted: usize, succeeded: usize, total_rows: usize) {
        let _ = (attempted, succeeded, total_rows);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
