use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::{
    llm::{build_client, AnalysisError, LlmClient, LlmSettings},
    model::{Assessment, MetricSnapshot, RiskLevel},
};

/// WBC count (cells/µL) above which the offline rule reports High risk.
pub const OFFLINE_WBC_THRESHOLD: f64 = 11_000.0;

pub const OFFLINE_SUMMARY: &str = "Offline analysis: risk derived from the WBC count against the 11,000 /mcL reference limit. An elevated WBC count can indicate abnormalities; consult a specialist about any high reading.";
pub const UNAVAILABLE_SUMMARY: &str =
    "Unable to perform AI analysis. Standard metrics check indicates stable condition.";
pub const OFFLINE_GUIDANCE: &str = "Maintain a balanced diet rich in fruits and vegetables.\nRegular exercise helps boost your immune system.";
pub const UNAVAILABLE_GUIDANCE: &str = "Eat iron-rich foods.\nStay hydrated.\nExercise regularly.";

/// Maps snapshots to advisory assessments, degrading to deterministic rules
/// whenever the remote service is unconfigured or misbehaves.
#[derive(Clone, Default)]
pub struct RiskClassifier {
    client: Option<Arc<dyn LlmClient>>,
}

impl RiskClassifier {
    pub fn new(client: Option<Arc<dyn LlmClient>>) -> Self {
        Self { client }
    }

    /// Classifier that never leaves the process.
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        let client = build_client(settings)?;
        if client.is_none() {
            debug!(provider = %settings.provider, "no inference credential; using offline rules");
        }
        Ok(Self::new(client))
    }

    pub fn is_online(&self) -> bool {
        self.client.is_some()
    }

    /// Always completes with an assessment; failures fall back without retry.
    #[instrument(name = "classify_snapshot", skip(self), fields(online = self.is_online()))]
    pub async fn classify(&self, metrics: &MetricSnapshot) -> Assessment {
        match self.try_classify(metrics).await {
            Ok(assessment) => assessment,
            Err(AnalysisError::ConfigurationAbsent) => offline_assessment(metrics),
            Err(err) => {
                warn!(error = %err, "remote classification failed; using fallback");
                unavailable_assessment()
            }
        }
    }

    /// The primary path alone, with the failure reason intact.
    pub async fn try_classify(&self, metrics: &MetricSnapshot) -> Result<Assessment, AnalysisError> {
        let client = self.client.as_ref().ok_or(AnalysisError::ConfigurationAbsent)?;
        client.assess(metrics).await
    }

    #[instrument(name = "health_guidance", skip(self), fields(online = self.is_online()))]
    pub async fn guidance(&self) -> String {
        let Some(client) = self.client.as_ref() else {
            return OFFLINE_GUIDANCE.to_string();
        };
        match client.guidance().await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("guidance service returned empty text; using fallback");
                UNAVAILABLE_GUIDANCE.to_string()
            }
            Err(err) => {
                warn!(error = %err, "guidance request failed; using fallback");
                UNAVAILABLE_GUIDANCE.to_string()
            }
        }
    }
}

impl std::fmt::Debug for RiskClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskClassifier")
            .field("online", &self.is_online())
            .finish()
    }
}

/// Rule used when no credential is configured.
pub fn offline_assessment(metrics: &MetricSnapshot) -> Assessment {
    let risk = if metrics.wbc > OFFLINE_WBC_THRESHOLD {
        RiskLevel::High
    } else {
        RiskLevel::Low
    };
    Assessment::new(risk, OFFLINE_SUMMARY)
}

/// Rule used when the service errored or answered nonsense.
pub fn unavailable_assessment() -> Assessment {
    Assessment::new(RiskLevel::Low, UNAVAILABLE_SUMMARY)
}
