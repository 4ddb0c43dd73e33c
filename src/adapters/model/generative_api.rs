//! HTTP client for a `generateContent`-style generative model endpoint.
//!
//! Audio is sent inline (base64) ahead of the instruction text, in the order
//! given by the request. Error bodies are reduced to a [`ModelCallError`]
//! carrying the status, the provider's message and any retry delay the
//! provider suggested (`Retry-After` header or a `RetryInfo` detail).

use async_trait::async_trait;
use base64::Engine;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ModelApiConfig;
use crate::domain::ports::{GenerationRequest, ModelCallError, ModelClient};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Configuration for the generative API client.
#[derive(Debug, Clone)]
pub struct GenerativeApiConfig {
    pub base_url: String,
    pub api_version: String,
    pub timeout_secs: u64,
}

impl Default for GenerativeApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_version: "v1beta".to_string(),
            timeout_secs: 240,
        }
    }
}

impl From<&ModelApiConfig> for GenerativeApiConfig {
    fn from(config: &ModelApiConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            timeout_secs: config.timeout_secs,
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

/// Client for the hosted generative model API.
pub struct GenerativeApiClient {
    config: GenerativeApiConfig,
    client: Client,
}

impl GenerativeApiClient {
    pub fn new(config: GenerativeApiConfig) -> DomainResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                DomainError::ValidationFailed(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version,
            model
        )
    }

    fn build_body(request: &GenerationRequest) -> GenerateContentRequest {
        let engine = base64::engine::general_purpose::STANDARD;
        let mut parts: Vec<Part> = request
            .attachments
            .iter()
            .map(|attachment| Part::Inline {
                inline_data: InlineData {
                    mime_type: attachment.mime_type.clone(),
                    data: engine.encode(&attachment.data),
                },
            })
            .collect();
        parts.push(Part::Text {
            text: request.instruction.clone(),
        });

        GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
                response_mime_type: "application/json",
            },
        }
    }
}

#[async_trait]
impl ModelClient for GenerativeApiClient {
    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<String, ModelCallError> {
        let body = Self::build_body(request);

        let response = self
            .client
            .post(self.endpoint(model))
            .header(header::CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelCallError::new(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let header_delay = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            return Err(error_from_body(status, &text, header_delay));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ModelCallError::new(Some(status.as_u16()), format!("malformed response: {e}")))?;

        extract_text(parsed)
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, ModelCallError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(ModelCallError::new(None, "response contained no candidates"));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ModelCallError::new(
            None,
            format!(
                "response contained no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ),
        ));
    }
    Ok(text)
}

/// Reduce an error response to a classifiable error.
fn error_from_body(status: StatusCode, body: &str, header_delay: Option<Duration>) -> ModelCallError {
    let (message, detail_delay) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let delay = envelope.error.details.iter().find_map(retry_delay_from_detail);
            let mut message = envelope.error.message;
            if let Some(code) = envelope.error.status {
                message = format!("{code}: {message}");
            }
            let quota_ids: Vec<&str> = envelope
                .error
                .details
                .iter()
                .filter_map(|d| d.get("violations"))
                .filter_map(|v| v.as_array())
                .flatten()
                .filter_map(|v| v.get("quotaId").and_then(|q| q.as_str()))
                .collect();
            if !quota_ids.is_empty() {
                message = format!("{message} [quota: {}]", quota_ids.join(", "));
            }
            (message, delay)
        }
        Err(_) if body.trim().is_empty() => (status.to_string(), None),
        Err(_) => (body.trim().to_string(), None),
    };

    let mut error = ModelCallError::new(Some(status.as_u16()), message);
    if let Some(delay) = header_delay.or(detail_delay) {
        error = error.with_retry_after(delay);
    }
    error
}

fn retry_delay_from_detail(detail: &serde_json::Value) -> Option<Duration> {
    let kind = detail.get("@type")?.as_str()?;
    if !kind.ends_with("RetryInfo") {
        return None;
    }
    parse_duration_secs(detail.get("retryDelay")?.as_str()?)
}

/// Parse a protobuf-style duration such as `"17s"` or `"2.5s"`.
fn parse_duration_secs(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().strip_suffix('s')?.parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}
