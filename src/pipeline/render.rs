//! pdfium access: the embedded text layer and page rasterisation.
//!
//! Everything here is blocking. pdfium keeps thread-local state and is not
//! async-safe, so callers run these functions inside `spawn_blocking` (see
//! [`crate::pipeline::text`]).
//!
//! The pdfium shared library is located through `pdfium-auto`:
//! `PDFIUM_LIB_PATH` if set, else a per-user cache, downloading it on first use.

use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Failure inside pdfium, reported as a plain message. Text acquisition treats
/// these as soft failures and only logs them.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to bind to pdfium library: {0}")]
    Binding(String),

    #[error("could not open PDF: {0}")]
    Open(String),

    #[error("page {page}: {detail}")]
    Page { page: usize, detail: String },
}

fn bind() -> Result<Pdfium, RenderError> {
    pdfium_auto::bind_pdfium_silent().map_err(|e| RenderError::Binding(e.to_string()))
}

fn open<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, RenderError> {
    pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| RenderError::Open(format!("{:?}", e)))
}

/// Concatenate the text layer of every page, in page order.
pub fn embedded_text_blocking(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<String, RenderError> {
    let pdfium = bind()?;
    let document = open(&pdfium, pdf_path, password)?;
    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let mut full_text = String::new();
    for (idx, page) in pages.iter().enumerate() {
        let text = page.text().map_err(|e| RenderError::Page {
            page: idx + 1,
            detail: format!("{:?}", e),
        })?;
        let page_text = text.all();
        debug!("Page {}: {} chars of embedded text", idx + 1, page_text.len());
        full_text.push_str(&page_text);
    }

    Ok(full_text)
}

/// Rasterise the pages at `dpi` one at a time, handing each image to `visit`
/// before the next page is rendered. Stops at the first error from either side.
///
/// PDF user space is 72 units per inch, so the scale factor is `dpi / 72`.
pub fn for_each_page_image<E, F>(
    pdf_path: &Path,
    dpi: u32,
    password: Option<&str>,
    mut visit: F,
) -> Result<usize, E>
where
    E: From<RenderError>,
    F: FnMut(usize, DynamicImage) -> Result<(), E>,
{
    let pdfium = bind()?;
    let document = open(&pdfium, pdf_path, password)?;
    let pages = document.pages();

    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

    let mut rendered = 0;
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::Page {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} at {} DPI → {}x{} px",
            idx + 1,
            dpi,
            image.width(),
            image.height()
        );
        drop(bitmap);
        visit(idx + 1, image)?;
        rendered += 1;
    }

    Ok(rendered)
}
