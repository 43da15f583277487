//! Error types for the edgequake-invoice2xlsx library.
//!
//! Two types mirror two failure scopes:
//!
//! * [`InvoiceError`]: everything that can stop one document (or one export)
//!   from completing. Returned as `Err(InvoiceError)` from
//!   [`crate::extract::extract_invoice`] and [`crate::export::save_rows`].
//!
//! * [`DocumentFailure`]: an [`InvoiceError`] captured at batch level together
//!   with the file it belongs to. Stored in [`crate::output::BatchOutput`] so a
//!   bad invoice never hides the results of the good ones.
//!
//! [`InvoiceError::kind`] collapses the variants into the coarse categories a
//! caller reports on: "could not read the PDF", "could not reach the model",
//! "the model answered with garbage", and so on.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edgequake-invoice2xlsx library.
#[derive(Debug, Error)]
pub enum InvoiceError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Text acquisition ─────────────────────────────────────────────────
    /// Neither the embedded text layer nor OCR produced any text.
    #[error("Could not extract any text from '{path}' (text layer and OCR both empty)")]
    TextAcquisitionFailed { path: PathBuf },

    // ── Model errors ──────────────────────────────────────────────────────
    /// No API key was supplied; raised before any network traffic.
    #[error("Gemini API key is required.\nPass --api-key or set GEMINI_API_KEY.")]
    MissingCredential,

    /// The model endpoint could not be reached or answered with a non-2xx status.
    #[error("API Error: {message}")]
    Connectivity {
        /// HTTP status when the server answered, `None` for transport failures.
        status: Option<u16>,
        message: String,
    },

    /// The endpoint answered 2xx but the body did not carry a JSON invoice.
    #[error("Could not parse a valid JSON response from the model: {detail}")]
    ResponseParse { detail: String },

    // ── Export errors ─────────────────────────────────────────────────────
    /// The workbook could not be read, built, or written.
    #[error("Failed to export rows to '{path}': {detail}\nCheck that the file is not open in another program.")]
    ExportFailed { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error category, stable across variant additions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    TextAcquisition,
    Configuration,
    Connectivity,
    ResponseParse,
    Export,
    Internal,
}

impl InvoiceError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            InvoiceError::FileNotFound { .. }
            | InvoiceError::PermissionDenied { .. }
            | InvoiceError::NotAPdf { .. } => ErrorKind::Input,
            InvoiceError::TextAcquisitionFailed { .. } => ErrorKind::TextAcquisition,
            InvoiceError::MissingCredential | InvoiceError::InvalidConfig(_) => {
                ErrorKind::Configuration
            }
            InvoiceError::Connectivity { .. } => ErrorKind::Connectivity,
            InvoiceError::ResponseParse { .. } => ErrorKind::ResponseParse,
            InvoiceError::ExportFailed { .. } => ErrorKind::Export,
            InvoiceError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Only transport failures, `429` and `5xx` qualify. Parse errors and other
    /// `4xx` statuses repeat deterministically.
    pub fn is_transient(&self) -> bool {
        match self {
            InvoiceError::Connectivity { status: None, .. } => true,
            InvoiceError::Connectivity {
                status: Some(code), ..
            } => *code == 429 || (500..600).contains(code),
            _ => false,
        }
    }
}

/// A failed document inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFailure {
    /// The input file that failed.
    pub path: PathBuf,
    /// Error category for programmatic handling.
    pub kind: ErrorKind,
    /// Human-readable error message.
    pub message: String,
}

impl DocumentFailure {
    pub fn new(path: impl Into<PathBuf>, error: &InvoiceError) -> Self {
        Self {
            path: path.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for DocumentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}
