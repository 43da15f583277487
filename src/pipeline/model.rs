//! Model client: send the prompt to Gemini and parse the invoice JSON.
//!
//! This is the only network call in the pipeline. Its errors are split so a
//! caller can tell "could not reach the model" ([`InvoiceError::Connectivity`])
//! from "the model answered, but not with an invoice"
//! ([`InvoiceError::ResponseParse`]).
//!
//! ## Retry Strategy
//!
//! Off by default (`max_retries = 0`). When enabled, only transient
//! connectivity failures (transport errors, `429`, `5xx`) are retried, with
//! exponential backoff `retry_backoff_ms * 2^(attempt-1)` plus up to 50 %
//! random jitter. Parse errors repeat deterministically and are never retried.

use crate::config::ExtractionConfig;
use crate::error::InvoiceError;
use crate::output::StructuredInvoice;
use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Fallback message when a failed response carries no readable error.
pub const GENERIC_CONNECTIVITY_MESSAGE: &str = "Failed to connect to Gemini API.";

/// Anything that turns a prompt into a structured invoice.
///
/// [`GeminiClient`] is the production implementation; tests and alternative
/// backends plug in through [`crate::config::ExtractionConfig::model_client`].
#[async_trait]
pub trait InvoiceModel: Send + Sync {
    async fn extract(&self, prompt: &str) -> Result<StructuredInvoice, InvoiceError>;
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

impl<'a> GenerateContentRequest<'a> {
    pub fn new(prompt: &'a str, temperature: f32) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature,
            },
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// Gemini `generateContent` client.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl GeminiClient {
    /// Build a client from the extraction settings.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, InvoiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| InvoiceError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// Send `prompt` with an explicit credential.
    ///
    /// A blank credential fails with [`InvoiceError::MissingCredential`]
    /// before any request is built.
    pub async fn submit(
        &self,
        prompt: &str,
        credential: &str,
    ) -> Result<StructuredInvoice, InvoiceError> {
        if credential.trim().is_empty() {
            return Err(InvoiceError::MissingCredential);
        }

        let request = GenerateContentRequest::new(prompt, self.temperature);
        info!(
            "Querying {} ({} prompt chars)",
            self.model,
            prompt.chars().count()
        );

        let mut attempt = 0u32;
        loop {
            match self.submit_once(&request, credential).await {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = backoff_with_jitter(self.retry_backoff_ms, attempt);
                    warn!(
                        "Model call failed ({}); retry {}/{} after {}ms",
                        e, attempt, self.max_retries, delay
                    );
                    sleep(Duration::from_millis(delay)).await;
                }
                other => return other,
            }
        }
    }

    async fn submit_once(
        &self,
        request: &GenerateContentRequest<'_>,
        credential: &str,
    ) -> Result<StructuredInvoice, InvoiceError> {
        let response = self
            .http
            .post(self.endpoint())
            .query(&[("key", credential)])
            .json(request)
            .send()
            .await
            // without_url(): the URL carries the API key as a query parameter.
            .map_err(|e| InvoiceError::Connectivity {
                status: None,
                message: format!("{} ({})", GENERIC_CONNECTIVITY_MESSAGE, e.without_url()),
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| InvoiceError::Connectivity {
                status: Some(status),
                message: format!("{} ({})", GENERIC_CONNECTIVITY_MESSAGE, e.without_url()),
            })?;
        debug!("Model responded HTTP {} with {} bytes", status, body.len());

        interpret_response(status, &body)
    }
}

#[async_trait]
impl InvoiceModel for GeminiClient {
    async fn extract(&self, prompt: &str) -> Result<StructuredInvoice, InvoiceError> {
        self.submit(prompt, self.api_key.as_deref().unwrap_or("")).await
    }
}

// ── Response handling ────────────────────────────────────────────────────

/// Classify an HTTP response from `generateContent`.
///
/// * non-2xx ⇒ [`InvoiceError::Connectivity`] with the body's
///   `error.message` when present.
/// * 2xx without `candidates[0].content.parts[0].text`, or whose text is not a
///   JSON object ⇒ [`InvoiceError::ResponseParse`].
pub fn interpret_response(status: u16, body: &str) -> Result<StructuredInvoice, InvoiceError> {
    if !(200..300).contains(&status) {
        let message = upstream_error_message(body)
            .unwrap_or_else(|| GENERIC_CONNECTIVITY_MESSAGE.to_string());
        return Err(InvoiceError::Connectivity {
            status: Some(status),
            message,
        });
    }

    let envelope: Value = serde_json::from_str(body).map_err(|e| InvoiceError::ResponseParse {
        detail: format!("response body is not JSON: {e}"),
    })?;

    let text = envelope
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .ok_or_else(|| InvoiceError::ResponseParse {
            detail: match envelope.pointer("/promptFeedback/blockReason") {
                Some(reason) => format!("prompt was blocked: {reason}"),
                None => "missing candidates[0].content.parts[0].text".to_string(),
            },
        })?;

    let inner: Value =
        serde_json::from_str(strip_code_fence(text)).map_err(|e| InvoiceError::ResponseParse {
            detail: format!("model output is not valid JSON: {e}"),
        })?;

    StructuredInvoice::from_value(inner).ok_or_else(|| InvoiceError::ResponseParse {
        detail: "model output is JSON but not an object".to_string(),
    })
}

fn upstream_error_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    v.pointer("/error/message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

/// Drop a surrounding ```` ```json ```` fence if the model added one anyway.
fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Delay before retry `attempt` (1-based): exponential base plus jitter in
/// `[0, base / 2]`.
fn backoff_with_jitter(base_ms: u64, attempt: u32) -> u64 {
    let exp = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let jitter = if exp >= 2 {
        rand::thread_rng().gen_range(0..=exp / 2)
    } else {
        0
    };
    exp + jitter
}
