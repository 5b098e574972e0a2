use super::{analysis_prompt, parse_assessment, AnalysisError, LlmClient, LlmSettings, GUIDANCE_PROMPT};
use crate::model::{Assessment, MetricSnapshot};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Single-attempt client for the Gemini `generateContent` REST API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let Some(api_key) = settings.api_key.clone() else {
            bail!("Gemini API key must be provided via BIOSENSE_API_KEY");
        };
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string());
        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            base.trim_end_matches('/'),
            model
        );
        let http = Client::builder()
            .user_agent("biosense/0.3")
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self { http, url, api_key })
    }

    async fn generate(&self, prompt: String, json_output: bool) -> Result<String, AnalysisError> {
        let payload = GeminiRequest {
            contents: vec![GeminiRequestContent {
                role: "user",
                parts: vec![GeminiRequestPart { text: prompt }],
            }],
            generation_config: json_output.then_some(GenerationConfig {
                response_mime_type: "application/json",
            }),
        };

        let response = self
            .http
            .post(&self.url)
            .query(&[("key", &self.api_key)])
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Service(format!(
                "Gemini API error ({status}): {body}"
            )));
        }

        let message: GeminiResponse = response.json().await.map_err(|err| {
            AnalysisError::MalformedResponse(format!("failed to parse Gemini response: {err}"))
        })?;
        let text = message
            .candidates
            .into_iter()
            .flat_map(|candidate| candidate.content.parts)
            .filter_map(|part| part.text)
            .next()
            .ok_or_else(|| {
                AnalysisError::MalformedResponse("Gemini response missing text content".into())
            })?;
        debug!(chars = text.len(), "Gemini responded");
        Ok(text)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn assess(&self, metrics: &MetricSnapshot) -> Result<Assessment, AnalysisError> {
        let content = self.generate(analysis_prompt(metrics), true).await?;
        parse_assessment(&content)
    }

    async fn guidance(&self) -> Result<String, AnalysisError> {
        self.generate(GUIDANCE_PROMPT.to_string(), false).await
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiRequestContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct GeminiRequestContent {
    role: &'static str,
    parts: Vec<GeminiRequestPart>,
}

#[derive(Serialize)]
struct GeminiRequestPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Deserialize)]
struct GeminiResponseContent {
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
}
