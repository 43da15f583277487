//! Streaming batch API: emit each document's outcome as soon as it finishes.
//!
//! ## Why stream?
//!
//! A batch of scanned invoices can take minutes. [`extract_stream`] yields one
//! item per document as it completes, so a caller can show rows, append to a
//! log, or stop early by dropping the stream. Documents are still processed
//! one at a time and in input order; nothing runs until the stream is polled.
//!
//! Under [`BatchPolicy::HaltOnError`] the stream ends right after the first
//! `Err` item; the remaining documents are never opened.

use crate::config::{BatchPolicy, ExtractionConfig};
use crate::error::{DocumentFailure, InvoiceError};
use crate::extract::Pipeline;
use crate::output::DocumentOutput;
use futures::stream;
use std::path::PathBuf;
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-document outcomes.
pub type DocumentStream =
    Pin<Box<dyn Stream<Item = Result<DocumentOutput, DocumentFailure>> + Send>>;

struct StreamState {
    pipeline: Pipeline,
    queue: std::iter::Enumerate<std::vec::IntoIter<PathBuf>>,
    total: usize,
    halted: bool,
}

/// Extract documents lazily, yielding each outcome in input order.
///
/// # Returns
/// - `Ok(DocumentStream)`: one item per attempted document
/// - `Err(InvoiceError)`: configuration error detected before the first
///   document (e.g. [`InvoiceError::MissingCredential`])
pub fn extract_stream(
    paths: Vec<PathBuf>,
    config: &ExtractionConfig,
) -> Result<DocumentStream, InvoiceError> {
    let pipeline = Pipeline::new(config)?;
    let total = paths.len();
    info!("Starting streaming extraction of {} documents", total);

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    let state = StreamState {
        pipeline,
        queue: paths.into_iter().enumerate(),
        total,
        halted: false,
    };

    let s = stream::unfold(state, |mut st| async move {
        if st.halted {
            return None;
        }
        let (i, path) = st.queue.next()?;
        let result = st
            .pipeline
            .run_document(&path, i + 1, st.total)
            .await
            .map_err(|e| DocumentFailure::new(&path, &e));
        if result.is_err() && st.pipeline.config().batch_policy == BatchPolicy::HaltOnError {
            st.halted = true;
        }
        Some((result, st))
    });

    Ok(Box::pin(s))
}
