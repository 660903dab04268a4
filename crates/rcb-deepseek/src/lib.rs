//! DeepSeek adapter (chat completions).
//!
//! Implements the `rcb-core` TextGenerator port over the OpenAI-compatible
//! `chat/completions` endpoint. One request per call, fixed timeout, no retries.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use rcb_core::{
    config::EnrichmentSettings,
    enrich::{EnrichmentError, EnrichmentRequest, TextGenerator},
    errors::Error,
    Result,
};

const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u32 = 1024;

#[derive(Clone, Debug)]
pub struct DeepSeekClient {
    api_key: String,
    model: String,
    url: String,
    http: reqwest::Client,
}

impl DeepSeekClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("reqwest client build: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            url: url.into(),
            http,
        })
    }

    /// Build from settings; `None` when no API key is configured.
    pub fn from_settings(settings: &EnrichmentSettings) -> Result<Option<Self>> {
        let Some(key) = settings.api_key.as_deref() else {
            return Ok(None);
        };
        Self::new(
            key,
            settings.model.as_str(),
            settings.api_url.as_str(),
            settings.timeout,
        )
        .map(Some)
    }

    fn payload(&self, req: &EnrichmentRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": req.system_prompt },
                { "role": "user", "content": req.user_message() }
            ],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> EnrichmentError {
    if e.is_timeout() {
        EnrichmentError::Timeout
    } else if e.is_connect() {
        EnrichmentError::Connection(e.to_string())
    } else {
        EnrichmentError::General(format!("request error: {e}"))
    }
}

/// `error.message` from an API error body, if present.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "Unknown error".to_string())
}

/// Assistant text from a chat-completions response body.
fn completion_text(v: &serde_json::Value) -> std::result::Result<String, EnrichmentError> {
    let text = v
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| EnrichmentError::General("malformed completion response".to_string()))?;

    if text.is_empty() {
        return Err(EnrichmentError::General(
            "completion returned empty text".to_string(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for DeepSeekClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        req: &EnrichmentRequest,
    ) -> std::result::Result<String, EnrichmentError> {
        debug!("deepseek request model={} title={:?}", self.model, req.title);

        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.payload(req))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(EnrichmentError::Http {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        let v: serde_json::Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                EnrichmentError::Timeout
            } else {
                EnrichmentError::General(format!("json error: {e}"))
            }
        })?;

        completion_text(&v)
    }
}
