use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Summary used when a classifier answers without any usable text.
pub const DEFAULT_SUMMARY: &str = "Analysis completed successfully.";

/// Upper bound consumers use when plotting WBC; the simulator itself is unbounded above.
pub const WBC_DISPLAY_CAP: f64 = 15_000.0;

const OXYGEN_WARNING_BELOW: f64 = 95.0;
const WBC_WARNING_ABOVE: f64 = 10_000.0;
const RBC_WARNING_BELOW: f64 = 4.2;

/// One synthetic reading of the three blood metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Oxygen saturation in percent.
    pub oxygen: f64,
    /// White blood cells per microliter.
    pub wbc: f64,
    /// Red blood cells in millions per microliter.
    pub rbc: f64,
}

impl MetricSnapshot {
    pub const fn new(oxygen: f64, wbc: f64, rbc: f64) -> Self {
        Self { oxygen, wbc, rbc }
    }

    /// Channels currently outside their comfortable display range.
    pub fn warnings(&self) -> Vec<MetricChannel> {
        let mut flagged = Vec::new();
        if self.oxygen < OXYGEN_WARNING_BELOW {
            flagged.push(MetricChannel::Oxygen);
        }
        if self.wbc > WBC_WARNING_ABOVE {
            flagged.push(MetricChannel::Wbc);
        }
        if self.rbc < RBC_WARNING_BELOW {
            flagged.push(MetricChannel::Rbc);
        }
        flagged
    }
}

impl Default for MetricSnapshot {
    fn default() -> Self {
        Self::new(98.0, 6000.0, 5.0)
    }
}

/// Individual sensor channel of a [`MetricSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricChannel {
    Oxygen,
    Wbc,
    Rbc,
}

/// Advisory risk tag attached to a scan. Only equality is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Moderate => "Moderate",
            Self::High => "High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown risk level `{0}` (expected Low, Moderate or High)")]
pub struct UnknownRiskLevel(pub String);

impl FromStr for RiskLevel {
    type Err = UnknownRiskLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "moderate" => Ok(Self::Moderate),
            "high" => Ok(Self::High),
            _ => Err(UnknownRiskLevel(s.to_string())),
        }
    }
}

/// Resolved output of a classification: a risk tag plus readable summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub risk: RiskLevel,
    pub summary: String,
}

impl Assessment {
    /// Blank summaries are replaced with [`DEFAULT_SUMMARY`].
    pub fn new(risk: RiskLevel, summary: impl Into<String>) -> Self {
        let summary = summary.into();
        let summary = if summary.trim().is_empty() {
            DEFAULT_SUMMARY.to_string()
        } else {
            summary
        };
        Self { risk, summary }
    }
}

/// A completed, classified scan. Never mutated once stored in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: MetricSnapshot,
    pub risk: RiskLevel,
    pub summary: String,
}

impl ScanRecord {
    /// Build a fresh record stamped with the current time and a new id.
    pub fn classified(metrics: MetricSnapshot, assessment: Assessment) -> Self {
        Self::at(next_record_id(), Utc::now(), metrics, assessment)
    }

    pub fn at(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        metrics: MetricSnapshot,
        assessment: Assessment,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            metrics,
            risk: assessment.risk,
            summary: assessment.summary,
        }
    }

    pub fn assessment(&self) -> Assessment {
        Assessment {
            risk: self.risk,
            summary: self.summary.clone(),
        }
    }
}

fn next_record_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("SCAN-{}", raw[..8].to_ascii_uppercase())
}
