//! Gauge-reading recognition collaborator.
//!
//! The grid only knows the [`Recognizer`] contract: one still image plus a
//! fixed instruction in, one text out. [`GeminiRecognizer`] is a raw reqwest
//! client for the Gemini `generateContent` endpoint. No streaming, single
//! request/response only.

use crate::config::RecognitionConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Constants ───────────────────────────────────────────────────────

/// Gemini REST API base.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Environment variable read for the API key by default.
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Answer the service gives when nothing on the image is legible.
pub const NO_READING: &str = "N/A";

/// Instruction sent with every gauge still.
pub const GAUGE_INSTRUCTION: &str = "Extract all numbers, values, and units of measurement from this image. \
Be precise and return only the extracted text. If multiple readings are present, separate them with a comma. \
If no text is clearly legible, respond with 'N/A'.";

const SYSTEM_INSTRUCTION: &str = "You are an AI assistant specialized in high-accuracy Optical Character \
Recognition (OCR) on images from industrial environments. Your task is to read text from gauges, \
digital readouts, and labels.";

// ── Errors ──────────────────────────────────────────────────────────

/// Errors from recognition requests.
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("{0} not set")]
    MissingApiKey(String),

    #[error("format error: {0}")]
    Format(String),

    #[error("recognition is disabled (no API key configured)")]
    Disabled,
}

pub type Result<T> = std::result::Result<T, RecognitionError>;

// ── Contract ────────────────────────────────────────────────────────

/// One still image submitted for reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionRequest {
    /// Base64 of the PNG bytes, no data-URL prefix
    pub image_base64: String,
    pub instruction: String,
}

impl RecognitionRequest {
    /// Request with the fixed gauge-reading instruction.
    pub fn gauge_reading(image_base64: String) -> Self {
        Self {
            image_base64,
            instruction: GAUGE_INSTRUCTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResponse {
    pub text: String,
}

/// External service that extracts text from a still image.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, request: RecognitionRequest) -> Result<RecognitionResponse>;
}

/// Stand-in used when no API key is available; every request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRecognizer;

#[async_trait]
impl Recognizer for DisabledRecognizer {
    async fn recognize(&self, _request: RecognitionRequest) -> Result<RecognitionResponse> {
        Err(RecognitionError::Disabled)
    }
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: Content,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

fn build_request(request: &RecognitionRequest) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![
                Part {
                    inline_data: Some(InlineData {
                        mime_type: crate::capture::STILL_MIME_TYPE.to_string(),
                        data: request.image_base64.clone(),
                    }),
                    ..Part::default()
                },
                Part {
                    text: Some(request.instruction.clone()),
                    ..Part::default()
                },
            ],
        }],
        system_instruction: Content {
            role: None,
            parts: vec![Part {
                text: Some(SYSTEM_INSTRUCTION.to_string()),
                ..Part::default()
            }],
        },
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(RecognitionError::Format(format!(
            "request blocked by safety filters: {}",
            reason
        )));
    }
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| RecognitionError::Format("no candidates returned".to_string()))?;
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    Ok(text.trim().to_string())
}

// ── Client ──────────────────────────────────────────────────────────

/// Gemini-backed recognizer.
pub struct GeminiRecognizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiRecognizer")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiRecognizer {
    /// Create a client, reading the API key from `config.api_key_env`.
    pub fn from_config(config: &RecognitionConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RecognitionError::MissingApiKey(config.api_key_env.clone()))?;
        Self::new(config, api_key)
    }

    pub fn new(config: &RecognitionConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl Recognizer for GeminiRecognizer {
    async fn recognize(&self, request: RecognitionRequest) -> Result<RecognitionResponse> {
        let body = build_request(&request);

        // Key goes in a header so it never shows up in logged URLs
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RecognitionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| RecognitionError::Format(e.to_string()))?;
        let text = extract_text(parsed)?;
        log::debug!("[recognition] {} -> '{}'", self.model, text);
        Ok(RecognitionResponse { text })
    }
}

/// Gemini when a key is available, otherwise [`DisabledRecognizer`].
pub fn recognizer_from_config(config: &RecognitionConfig) -> std::sync::Arc<dyn Recognizer> {
    match GeminiRecognizer::from_config(config) {
        Ok(client) => {
            log::info!("Gauge recognition enabled ({})", config.model);
            std::sync::Arc::new(client)
        }
        Err(e) => {
            log::warn!("Gauge recognition disabled: {}", e);
            std::sync::Arc::new(DisabledRecognizer)
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
