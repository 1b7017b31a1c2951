//! Instruction-driven extraction through the Gemini `generateContent` API
//!
//! Used for the student number, where exact digit fidelity matters more
//! than a fixed-vocabulary OCR model can offer. Every request is preceded
//! by a fixed pacing delay to stay under the service's rate limit.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::RgbImage;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::debug;

use super::ocr::{encode_png, BackendError, InstructionExtractor, Recognizer};
use crate::config::BackendSettings;

/// Blocking delay before every outbound request
#[derive(Debug, Clone, Copy)]
pub struct RequestPacer {
    delay: Duration,
}

impl RequestPacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Sleep for the configured delay
    pub fn wait(&self) {
        if !self.delay.is_zero() {
            debug!("Pacing request for {:?}", self.delay);
            thread::sleep(self.delay);
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Part<'a> {
    InlineData { mime_type: &'a str, data: String },
    Text(&'a str),
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Client for the Gemini generative language API
#[derive(Clone)]
pub struct GeminiBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    pacer: RequestPacer,
    text_instruction: String,
}

impl fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("pacer", &self.pacer)
            .finish()
    }
}

impl GeminiBackend {
    /// Build a client from settings, reading the API key from the environment
    pub fn from_settings(settings: &BackendSettings) -> Result<Self, BackendError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| BackendError::MissingApiKey(settings.api_key_env.clone()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: settings.gemini_endpoint.trim_end_matches('/').to_string(),
            model: settings.gemini_model.clone(),
            api_key,
            pacer: RequestPacer::new(Duration::from_millis(settings.request_pacing_ms)),
            text_instruction: settings.text_instruction.clone(),
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

impl InstructionExtractor for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn extract(&self, region: &RgbImage, instruction: &str) -> Result<String, BackendError> {
        let body = build_request(&encode_png(region)?, instruction);

        self.pacer.wait();
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()?;

        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let answer = parse_response(&text)?;
        debug!("{} answered {:?}", self.model, answer);
        Ok(answer)
    }
}

impl Recognizer for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn recognize(&self, region: &RgbImage) -> Result<String, BackendError> {
        self.extract(region, &self.text_instruction)
    }
}

fn build_request<'a>(png: &[u8], instruction: &'a str) -> GenerateRequest<'a> {
    GenerateRequest {
        contents: [Content {
            parts: vec![
                Part::InlineData {
                    mime_type: "image/png",
                    data: BASE64.encode(png),
                },
                Part::Text(instruction),
            ],
        }],
    }
}

/// Text of the first candidate, trimmed
fn parse_response(body: &str) -> Result<String, BackendError> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .ok_or_else(|| BackendError::MalformedResponse("no candidates in response".to_string()))?;

    let text: String = parts.into_iter().filter_map(|p| p.text).collect();
    Ok(text.trim().to_string())
}
