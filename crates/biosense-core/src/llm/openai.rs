use super::{analysis_prompt, parse_assessment, AnalysisError, LlmClient, LlmSettings, GUIDANCE_PROMPT};
use crate::model::{Assessment, MetricSnapshot};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are a cautious assistant for a simulated blood-metrics screening device. Results are advisory and never diagnostic.";

/// Client for any OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let Some(api_key) = settings.api_key.clone() else {
            bail!("OpenAI API key must be provided via BIOSENSE_API_KEY");
        };
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent("biosense/0.3")
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            http,
            url,
            api_key,
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
        })
    }

    async fn complete(&self, prompt: String, json_output: bool) -> Result<String, AnalysisError> {
        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.2,
            max_tokens: 200,
            response_format: json_output.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Service(format!(
                "OpenAI API error ({status}): {body}"
            )));
        }

        let chat: ChatCompletionResponse = response.json().await.map_err(|err| {
            AnalysisError::MalformedResponse(format!("failed to parse OpenAI response: {err}"))
        })?;
        chat.choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| {
                AnalysisError::MalformedResponse("OpenAI response missing message content".into())
            })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn assess(&self, metrics: &MetricSnapshot) -> Result<Assessment, AnalysisError> {
        let content = self.complete(analysis_prompt(metrics), true).await?;
        parse_assessment(&content)
    }

    async fn guidance(&self) -> Result<String, AnalysisError> {
        self.complete(GUIDANCE_PROMPT.to_string(), false).await
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}
