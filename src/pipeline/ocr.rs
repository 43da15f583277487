//! Tesseract OCR over rasterised pages (via `leptess`).
//!
//! Pages are rendered and recognised one at a time, so only the current page
//! image is held in memory.
//!
//! leptess takes encoded image bytes, so each page is PNG-encoded in memory
//! first. The resolution is forwarded to Tesseract so it does not have to guess
//! glyph size from missing PNG metadata.

use crate::pipeline::render::{self, RenderError};
use image::DynamicImage;
use leptess::LepTess;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("failed to initialise Tesseract with language '{language}': {detail}")]
    Init { language: String, detail: String },

    #[error("page {page}: {detail}")]
    Recognition { page: usize, detail: String },

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// One Tesseract instance fed page by page. Text accumulates in page order,
/// each page followed by a newline.
pub struct PageRecognizer {
    tess: LepTess,
    dpi: u32,
    text: String,
}

impl PageRecognizer {
    pub fn new(language: &str, dpi: u32) -> Result<Self, OcrError> {
        let tess = LepTess::new(None, language).map_err(|e| OcrError::Init {
            language: language.to_string(),
            detail: e.to_string(),
        })?;
        Ok(Self {
            tess,
            dpi,
            text: String::new(),
        })
    }

    /// Recognise one page and append its text. The image is dropped on return.
    pub fn recognize(&mut self, page: usize, image: DynamicImage) -> Result<(), OcrError> {
        let text = recognize_page(&mut self.tess, &image, self.dpi)
            .map_err(|detail| OcrError::Recognition { page, detail })?;
        debug!("OCR page {}: {} chars", page, text.len());
        self.text.push_str(&text);
        self.text.push('\n');
        Ok(())
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Render `pdf_path` at `dpi` and OCR it, holding one page image at a time.
pub fn recognize_pdf(
    pdf_path: &Path,
    language: &str,
    dpi: u32,
    password: Option<&str>,
) -> Result<String, OcrError> {
    let mut recognizer = PageRecognizer::new(language, dpi)?;
    let pages = render::for_each_page_image(pdf_path, dpi, password, |page, image| {
        recognizer.recognize(page, image)
    })?;
    debug!("OCR finished: {} pages", pages);
    Ok(recognizer.into_text())
}

fn recognize_page(tess: &mut LepTess, image: &DynamicImage, dpi: u32) -> Result<String, String> {
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| format!("PNG encoding failed: {e}"))?;

    tess.set_image_from_mem(&png)
        .map_err(|e| format!("could not load page image: {e}"))?;
    tess.set_source_resolution(dpi as i32);

    tess.get_utf8_text()
        .map_err(|e| format!("recognised text is not UTF-8: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_failure_keeps_page_context() {
        let err: OcrError = RenderError::Page {
            page: 4,
            detail: "bitmap allocation failed".into(),
        }
        .into();
        assert!(matches!(err, OcrError::Render(RenderError::Page { page: 4, .. })));
        assert_eq!(err.to_string(), "page 4: bitmap allocation failed");
    }
}
