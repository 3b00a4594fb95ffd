use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{AnalysisBackend, AnalysisRequest};
use crate::settings::AnalysisConfig;

const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// `generateContent` client with JSON-schema constrained output.
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>, config: &AnalysisConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: config.model.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_env(config: &AnalysisConfig) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .with_context(|| format!("{API_KEY_ENV} is not set"))?;
        Self::new(api_key, config)
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl AnalysisBackend for GeminiBackend {
    async fn generate(&self, request: AnalysisRequest) -> Result<Value> {
        let body = build_request_body(&request);

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("analysis request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            bail!("analysis request failed with {status}: {error}");
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .context("analysis response was not valid JSON")?;
        extract_json(parsed)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

fn build_request_body(request: &AnalysisRequest) -> Value {
    let mut parts = vec![json!({ "text": request.prompt })];
    if let Some(image) = &request.image {
        parts.push(json!({
            "inlineData": {
                "mimeType": image.mime_type,
                "data": BASE64.encode(&image.data),
            }
        }));
    }

    json!({
        "systemInstruction": { "parts": [{ "text": request.system_prompt }] },
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": request.schema,
            "temperature": 0.2,
        }
    })
}

fn extract_json(response: GenerateResponse) -> Result<Value> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .ok_or_else(|| anyhow!("analysis response had no candidates"))?
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect();

    if text.trim().is_empty() {
        bail!("analysis response had no text");
    }

    serde_json::from_str(&text).context("analysis response text was not the requested JSON")
}
