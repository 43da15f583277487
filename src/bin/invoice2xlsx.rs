//! CLI binary for edgequake-invoice2xlsx.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig`, runs the batch and reports the result.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_invoice2xlsx::pipeline::input::collect_pdf_inputs;
use edgequake_invoice2xlsx::{
    extract_batch, extract_batch_to_xlsx, BatchOutput, BatchPolicy, DocumentStage,
    ExtractionConfig, ExtractionProgressCallback, ProgressCallback, RowPolicy, EXPORT_COLUMNS,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the batch, one log line per finished document.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start of the document currently in flight.
    doc_start: Mutex<Option<Instant>>,
    /// File name of the document currently in flight.
    current: Mutex<String>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            doc_start: Mutex::new(None),
            current: Mutex::new(String::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self) -> f64 {
        self.doc_start
            .lock()
            .ok()
            .and_then(|mut s| s.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn current_name(&self) -> String {
        self.current.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.set_length(total_documents as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_documents} invoice(s)…"))
        ));
    }

    fn on_document_start(&self, _index: usize, _total: usize, path: &Path) {
        let name = file_name(path);
        if let Ok(mut s) = self.doc_start.lock() {
            *s = Some(Instant::now());
        }
        if let Ok(mut c) = self.current.lock() {
            *c = name.clone();
        }
        self.bar.set_message(name);
    }

    fn on_document_stage(&self, _index: usize, _total: usize, stage: DocumentStage) {
        let name = self.current_name();
        let msg = match stage {
            DocumentStage::ReadingText => format!("{name}: reading text"),
            DocumentStage::OcrFallback { embedded_chars } => {
                format!("{name}: OCR ({embedded_chars} chars embedded)")
            }
            DocumentStage::QueryingModel => format!("{name}: asking Gemini"),
            DocumentStage::Flattening => format!("{name}: building rows"),
        };
        self.bar.set_message(msg);
    }

    fn on_document_complete(&self, index: usize, total: usize, rows: usize) {
        self.bar.println(format!(
            "  {} [{:>3}/{:<3}] {:<40}  {}  {}",
            green("✓"),
            index,
            total,
            self.current_name(),
            dim(&format!("{rows:>3} rows")),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let first_line = error.lines().next().unwrap_or(error);
        let msg = match first_line.char_indices().nth(80) {
            Some((cut, _)) => format!("{}\u{2026}", &first_line[..cut]),
            None => first_line.to_string(),
        };
        self.bar.println(format!(
            "  {} [{:>3}/{:<3}] {:<40}  {}  {}",
            red("✗"),
            index,
            total,
            self.current_name(),
            red(&msg),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, attempted: usize, succeeded: usize, total_rows: usize) {
        self.bar.finish_and_clear();
        let failed = attempted.saturating_sub(succeeded);
        if failed == 0 {
            eprintln!(
                "{} {} invoice(s) processed, {} rows",
                green("✔"),
                bold(&succeeded.to_string()),
                bold(&total_rows.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} invoice(s) processed  ({} failed), {} rows",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                attempted,
                red(&failed.to_string()),
                total_rows,
            );
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Append the line items of two invoices to a workbook
  invoice2xlsx a.pdf b.pdf -o purchases.xlsx

  # Every PDF in a folder, keep going past bad files
  invoice2xlsx ./inbox --continue-on-error -o purchases.xlsx

  # Print rows as TSV (no workbook)
  invoice2xlsx invoice.pdf

  # Full batch report as JSON
  invoice2xlsx --json invoice.pdf > report.json

  # Scanned Hindi/English invoices at a higher OCR threshold
  invoice2xlsx --lang eng+hin --ocr-threshold 300 scan.pdf -o out.xlsx

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (required)
  INVOICE2XLSX_MODEL      Override model ID (default gemini-2.0-flash)
  PDFIUM_LIB_PATH         Path to an existing libpdfium — skips auto-download
  TESSDATA_PREFIX         Directory holding Tesseract traineddata files

SETUP:
  1. Install Tesseract + Leptonica (e.g. apt install tesseract-ocr libleptonica-dev)
  2. Set API key:     export GEMINI_API_KEY=AIza...
  3. Extract:         invoice2xlsx invoice.pdf -o purchases.xlsx

  PDFium is downloaded automatically on first run and cached locally.
"#;

/// Extract invoice line items from PDFs into an xlsx workbook using Gemini.
#[derive(Parser, Debug)]
#[command(
    name = "invoice2xlsx",
    version,
    about = "Extract invoice line items from PDFs into an xlsx workbook using Gemini",
    long_about = "Read each invoice PDF (embedded text, or OCR for scans), ask Google Gemini to \
fill a fixed invoice schema, and append one row per line item to an xlsx workbook.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files or directories containing PDFs.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Append rows to this xlsx workbook (created if missing).
    #[arg(short, long, env = "INVOICE2XLSX_OUTPUT")]
    output: Option<PathBuf>,

    /// Google Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Gemini model ID.
    #[arg(long, env = "INVOICE2XLSX_MODEL", default_value = edgequake_invoice2xlsx::config::DEFAULT_MODEL)]
    model: String,

    /// API base URL (for proxies).
    #[arg(long, env = "INVOICE2XLSX_BASE_URL", default_value = edgequake_invoice2xlsx::config::DEFAULT_BASE_URL)]
    base_url: String,

    /// Embedded-text length below which OCR is used instead.
    #[arg(long, env = "INVOICE2XLSX_OCR_THRESHOLD", default_value_t = 150)]
    ocr_threshold: usize,

    /// OCR rasterisation DPI (72–600).
    #[arg(long, env = "INVOICE2XLSX_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Tesseract language(s), e.g. eng or eng+hin.
    #[arg(long, env = "INVOICE2XLSX_LANG", default_value = "eng")]
    lang: String,

    /// Model temperature.
    #[arg(long, env = "INVOICE2XLSX_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries on transient API errors (429, 5xx, network).
    #[arg(long, env = "INVOICE2XLSX_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Per-request API timeout in seconds.
    #[arg(long, env = "INVOICE2XLSX_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Keep processing after a failed invoice and export what succeeded.
    #[arg(long, env = "INVOICE2XLSX_CONTINUE_ON_ERROR")]
    continue_on_error: bool,

    /// Emit no row for invoices without line items.
    #[arg(long, env = "INVOICE2XLSX_SKIP_EMPTY")]
    skip_empty: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "INVOICE2XLSX_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Text file replacing the built-in extraction instructions.
    #[arg(long, env = "INVOICE2XLSX_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Print the batch report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "INVOICE2XLSX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INVOICE2XLSX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INVOICE2XLSX_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar already reports each document; keep library INFO logs out of it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Resolve inputs ───────────────────────────────────────────────────
    let inputs = collect_pdf_inputs(&cli.inputs).context("Failed to list input files")?;
    if inputs.is_empty() {
        bail!("No PDF files found in the given inputs");
    }

    // ── Ensure PDFium engine is available ───────────────────────────────
    if !pdfium_auto::is_pdfium_cached() {
        if show_progress {
            let dl_bar = ProgressBar::new(0);
            dl_bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  \
                     [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(TICKS),
            );
            dl_bar.set_prefix("PDF engine");
            dl_bar.enable_steady_tick(Duration::from_millis(80));

            let bar = dl_bar.clone();
            tokio::task::block_in_place(|| {
                pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
                    if let Some(t) = total {
                        if bar.length().unwrap_or(0) != t {
                            bar.set_length(t);
                        }
                    }
                    bar.set_position(downloaded);
                }))
            })
            .context("Failed to download PDFium engine")?;

            dl_bar.finish_and_clear();
        } else {
            tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
                .context("Failed to download PDFium engine")?;
        }
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Run ──────────────────────────────────────────────────────────────
    let batch = if let Some(ref output_path) = cli.output {
        let (batch, export) = extract_batch_to_xlsx(&inputs, output_path, &config)
            .await
            .context("Extraction failed")?;

        let export = match export {
            Ok(export) => export,
            Err(e) => {
                // Dump the rows to stdout before failing.
                if !cli.json {
                    write_tsv(&batch).context("Failed to write to stdout")?;
                }
                return Err(e).context("Export failed");
            }
        };

        if !cli.quiet {
            match export {
                Some(summary) => eprintln!(
                    "{}  {} rows {} {}",
                    green("✔"),
                    summary.rows_written,
                    if summary.created { "written to" } else { "appended to" },
                    bold(&summary.path.display().to_string()),
                ),
                None => eprintln!("{}  nothing exported", cyan("⚠")),
            }
        }
        batch
    } else {
        let batch = extract_batch(&inputs, &config)
            .await
            .context("Extraction failed")?;
        if !cli.json {
            write_tsv(&batch).context("Failed to write to stdout")?;
        }
        batch
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&batch).context("Failed to serialise report")?;
        println!("{json}");
    }

    if !cli.quiet && !show_progress {
        eprintln!(
            "Processed {}/{} invoices, {} rows in {}ms",
            batch.stats.succeeded,
            batch.stats.total_documents,
            batch.stats.total_rows,
            batch.stats.total_duration_ms
        );
    }

    if !batch.failures.is_empty() {
        for failure in &batch.failures {
            eprintln!("{} {}", red("error:"), failure);
        }
        if batch.halted() {
            bail!(
                "Processing stopped due to an error ({} of {} invoices not attempted)",
                batch.stats.total_documents - batch.stats.attempted,
                batch.stats.total_documents
            );
        }
        bail!("{} invoice(s) failed", batch.failures.len());
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .model(cli.model.clone())
        .base_url(cli.base_url.clone())
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .ocr_threshold(cli.ocr_threshold)
        .ocr_dpi(cli.dpi)
        .ocr_language(cli.lang.clone())
        .batch_policy(if cli.continue_on_error {
            BatchPolicy::ContinueOnError
        } else {
            BatchPolicy::HaltOnError
        })
        .row_policy(if cli.skip_empty {
            RowPolicy::SkipDocument
        } else {
            RowPolicy::SynthesizeEmpty
        });

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(ref path) = cli.prompt_file {
        let instructions = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt_override(instructions);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Print the export columns of every row as tab-separated values.
fn write_tsv(batch: &BatchOutput) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", EXPORT_COLUMNS.join("\t"))?;
    for row in batch.rows() {
        let cells: Vec<String> = EXPORT_COLUMNS
            .iter()
            .map(|c| match row.get(c) {
                None | Some(Value::Null) => "NA".to_string(),
                Some(Value::String(s)) => s.replace(['\t', '\n'], " "),
                Some(other) => other.to_string(),
            })
            .collect();
        writeln!(out, "{}", cells.join("\t"))?;
    }
    Ok(())
}
