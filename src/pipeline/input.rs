//! Input validation: make sure a path names a readable PDF before any
//! extraction work starts.
//!
//! pdfium reports a missing or non-PDF file as an opaque load error, which the
//! soft-failing text paths would only log. Checking up front turns those cases
//! into precise per-document errors instead of a generic "no text" failure.

use crate::error::InvoiceError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate that `path` exists, is readable, and starts with the `%PDF` magic.
pub fn validate_pdf(path: &Path) -> Result<PathBuf, InvoiceError> {
    let path = path.to_path_buf();

    if !path.is_file() {
        return Err(InvoiceError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(InvoiceError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(InvoiceError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(InvoiceError::FileNotFound { path });
        }
    }

    debug!("Validated PDF: {}", path.display());
    Ok(path)
}

/// Keep only inputs with a `.pdf` extension (case-insensitive), expanding
/// directories one level deep. Order is preserved; directory entries are
/// sorted by name.
pub fn collect_pdf_inputs(inputs: &[PathBuf]) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(input)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && has_pdf_extension(p))
                .collect();
            entries.sort();
            out.extend(entries);
        } else {
            out.push(input.clone());
        }
    }
    Ok(out)
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}
