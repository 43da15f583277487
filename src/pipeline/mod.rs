//! Pipeline stages for invoice extraction.
//!
//! Each submodule implements one step; the orchestration lives in
//! [`crate::extract`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ text ──────────────▶ prompt ──▶ model ──▶ flatten
//! (%PDF)    (render | ocr)       (schema)   (Gemini)  (rows)
//! ```
//!
//! 1. [`input`]: validate the path names a readable PDF
//! 2. [`text`]: embedded text layer via [`render`], OCR via [`ocr`] when
//!    sparse; runs in `spawn_blocking`
//! 3. [`crate::prompts`]: schema + instructions + raw text
//! 4. [`model`]: the single network call
//! 5. [`flatten`]: nested JSON → one row per line item

pub mod flatten;
pub mod input;
pub mod model;
pub mod ocr;
pub mod render;
pub mod text;
