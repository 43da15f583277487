//! # edgequake-invoice2xlsx
//!
//! Extract line items from invoice PDFs with Google Gemini and append them to
//! an xlsx sheet.
//!
//! ## Why this crate?
//!
//! Invoices arrive as a mix of digitally generated PDFs and phone scans, each
//! with its own layout. Rather than writing per-supplier templates, this crate
//! hands the raw text to an LLM together with a fixed JSON schema, then
//! flattens the answer into one spreadsheet row per line item.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    validate path and %PDF magic
//!  ├─ 2. Text     pdfium text layer; Tesseract OCR when < 150 chars
//!  ├─ 3. Prompt   instructions + JSON schema + raw text
//!  ├─ 4. Model    one Gemini generateContent call (JSON mode)
//!  ├─ 5. Flatten  invoice fields × line items → rows
//!  └─ 6. Export   append to Sheet1 (atomic rewrite)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_invoice2xlsx::{extract_batch_to_xlsx, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .api_key(std::env::var("GEMINI_API_KEY")?)
//!         .build()?;
//!     let (batch, export) =
//!         extract_batch_to_xlsx(&["a.pdf", "b.pdf"], "invoices.xlsx", &config).await?;
//!     eprintln!("{} rows from {} documents", batch.stats.total_rows, batch.stats.succeeded);
//!     if let Some(summary) = export? {
//!         eprintln!("written to {}", summary.path.display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice2xlsx` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ## System Requirements
//!
//! OCR needs Tesseract and Leptonica installed, plus the traineddata for the
//! configured language. pdfium is fetched on first use unless
//! `PDFIUM_LIB_PATH` points at an existing library.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{BatchPolicy, ExtractionConfig, ExtractionConfigBuilder, RowPolicy};
pub use error::{DocumentFailure, ErrorKind, InvoiceError};
pub use export::{save_rows, ExportSummary, EXPORT_COLUMNS};
pub use extract::{
    extract_batch, extract_batch_to_xlsx, extract_from_bytes, extract_invoice, extract_sync,
};
pub use output::{
    BatchOutput, BatchStats, DocumentOutput, ExtractedText, FlatRow, StructuredInvoice, TextSource,
};
pub use pipeline::flatten::flatten;
pub use pipeline::model::{GeminiClient, InvoiceModel};
pub use pipeline::text::{PdfiumTesseractExtractor, TextExtractor};
pub use progress::{
    DocumentStage, ExtractionProgressCallback, NoopProgressCallback, ProgressCallback,
};
pub use prompts::build_prompt;
pub use stream::{extract_stream, DocumentStream};
