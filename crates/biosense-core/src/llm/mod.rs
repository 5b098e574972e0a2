mod gemini;
mod openai;
mod settings;

use std::{fmt, str::FromStr, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{Assessment, MetricSnapshot, RiskLevel};

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;
pub use settings::{LlmOverrides, LlmSettings};

/// Client abstraction for the remote text-generation service.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Ask the service for a risk level and summary for one snapshot.
    async fn assess(&self, metrics: &MetricSnapshot) -> Result<Assessment, AnalysisError>;

    /// Free-form lifestyle guidance, no structured output required.
    async fn guidance(&self) -> Result<String, AnalysisError>;
}

/// Reasons the primary inference path did not produce a usable answer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("no inference credential configured")]
    ConfigurationAbsent,
    #[error("inference service error: {0}")]
    Service(String),
    #[error("malformed inference response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        Self::Service(err.to_string())
    }
}

/// Supported inference backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    /// Never calls out; every classification uses the offline rule.
    Offline,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "offline" | "noop" | "none" => Ok(Self::Offline),
            other => bail!("unsupported inference provider `{other}`"),
        }
    }
}

/// Build the configured client, or `None` when no credential is available.
pub fn build_client(settings: &LlmSettings) -> Result<Option<Arc<dyn LlmClient>>> {
    if !settings.has_credential() {
        return Ok(None);
    }
    let client: Arc<dyn LlmClient> = match settings.provider {
        ProviderKind::Gemini => Arc::new(GeminiClient::new(settings)?),
        ProviderKind::OpenAi => Arc::new(OpenAiClient::new(settings)?),
        ProviderKind::Offline => return Ok(None),
    };
    Ok(Some(client))
}

pub(crate) const GUIDANCE_PROMPT: &str = "Provide 3 concise, bullet-pointed healthy lifestyle tips specifically relevant to blood health and immune system support. Keep it under 50 words total.";

pub(crate) fn analysis_prompt(metrics: &MetricSnapshot) -> String {
    format!(
        "You are the analysis assistant of a simulated leukemia risk screening device.\n\
         Analyze the following simulated blood sensor data:\n\
         - Oxygen Saturation: {oxygen:.1}%\n\
         - White Blood Cell (WBC) Count: {wbc:.0} /mcL\n\
         - Red Blood Cell (RBC) Count: {rbc:.2} M/mcL\n\n\
         Task:\n\
         1. Determine a simulated risk level (Low, Moderate, High) based on general leukemia indicators (e.g. very high WBC, low RBC).\n\
         2. Provide a concise, bulleted clinical summary of findings (max 40 words).\n\n\
         Respond with strict JSON: {{\"risk\": \"Low\" | \"Moderate\" | \"High\", \"summary\": \"...\"}}",
        oxygen = metrics.oxygen,
        wbc = metrics.wbc,
        rbc = metrics.rbc,
    )
}

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9]*\s*(.*?)\s*```$").expect("static regex"));

#[derive(Deserialize)]
struct ModelAssessment {
    #[serde(default)]
    risk: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

/// Interpret model output as `{risk, summary}`.
///
/// Strict JSON is tried first, then JSON5 for trailing commas and similar slips.
/// A missing `risk` means Low; an unrecognised one is malformed.
pub fn parse_assessment(content: &str) -> Result<Assessment, AnalysisError> {
    let trimmed = content.trim();
    let body = CODE_FENCE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str());

    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(strict) => json5::from_str(body).map_err(|_| {
            AnalysisError::MalformedResponse(format!("expected JSON assessment: {strict}"))
        })?,
    };
    if !value.is_object() {
        return Err(AnalysisError::MalformedResponse(
            "expected a JSON object with `risk` and `summary`".into(),
        ));
    }
    let parsed: ModelAssessment = serde_json::from_value(value)
        .map_err(|err| AnalysisError::MalformedResponse(err.to_string()))?;

    let risk = match parsed.risk.as_deref().map(str::trim) {
        None | Some("") => RiskLevel::Low,
        Some(raw) => raw
            .parse::<RiskLevel>()
            .map_err(|err| AnalysisError::MalformedResponse(err.to_string()))?,
    };
    Ok(Assessment::new(risk, parsed.summary.unwrap_or_default()))
}
