use std::fmt::Write;

use serde::Serialize;

use crate::model::{MetricChannel, MetricSnapshot, RiskLevel, ScanRecord};

/// Format styles supported by the default renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Render a classified scan in the requested format.
pub fn render_record(record: &ScanRecord, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => render_human(record),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&JsonRecord::from(record))?),
    }
}

/// Split a summary into display lines, dropping `-`/`*` bullet markers and blanks.
pub fn summary_lines(summary: &str) -> Vec<String> {
    summary
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.strip_prefix(['-', '*'])
                .map_or(line, str::trim_start)
                .to_string()
        })
        .collect()
}

fn render_human(record: &ScanRecord) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(out, "Scan {} ({})", record.id, record.timestamp.format("%b %-d, %Y %H:%M UTC"))?;
    writeln!(out, "Risk Level: {}", record.risk)?;
    writeln!(out)?;
    write_metrics(&mut out, &record.metrics)?;
    writeln!(out)?;
    writeln!(out, "Findings:")?;
    for line in summary_lines(&record.summary) {
        writeln!(out, "  • {line}")?;
    }
    Ok(out)
}

fn write_metrics(out: &mut String, metrics: &MetricSnapshot) -> std::fmt::Result {
    let warnings = metrics.warnings();
    let flag = |channel: MetricChannel| if warnings.contains(&channel) { " (!)" } else { "" };
    writeln!(
        out,
        "  Oxygen Saturation: {:>8.1} %{}",
        metrics.oxygen,
        flag(MetricChannel::Oxygen)
    )?;
    writeln!(
        out,
        "  WBC Count:         {:>8.0} /mcL{}",
        metrics.wbc,
        flag(MetricChannel::Wbc)
    )?;
    writeln!(
        out,
        "  RBC Count:         {:>8.2} M/mcL{}",
        metrics.rbc,
        flag(MetricChannel::Rbc)
    )
}

#[derive(Debug, Serialize)]
struct JsonRecord<'a> {
    id: &'a str,
    timestamp: String,
    risk: RiskLevel,
    metrics: &'a MetricSnapshot,
    warnings: Vec<MetricChannel>,
    summary: &'a str,
    findings: Vec<String>,
}

impl<'a> From<&'a ScanRecord> for JsonRecord<'a> {
    fn from(record: &'a ScanRecord) -> Self {
        Self {
            id: &record.id,
            timestamp: record.timestamp.to_rfc3339(),
            risk: record.risk,
            metrics: &record.metrics,
            warnings: record.metrics.warnings(),
            summary: &record.summary,
            findings: summary_lines(&record.summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Assessment;
    use chrono::{TimeZone, Utc};

    fn sample_record() -> ScanRecord {
        ScanRecord::at(
            "SCAN-TEST",
            Utc.with_ymd_and_hms(2025, 1, 30, 9, 0, 0).unwrap(),
            MetricSnapshot::new(96.0, 11_500.0, 3.9),
            Assessment::new(
                RiskLevel::High,
                "- Elevated WBC detected\n* RBC below range\n\nConsult a specialist",
            ),
        )
    }

    #[test]
    fn strips_bullet_markers() {
        let lines = summary_lines("- one\n  *two\nthree\n\n-  four");
        assert_eq!(lines, vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn human_report_contains_risk_and_findings() {
        let output = render_record(&sample_record(), OutputFormat::Human).unwrap();
        assert!(output.contains("Risk Level: High"));
        assert!(output.contains("SCAN-TEST"));
        assert!(output.contains("• Elevated WBC detected"));
        assert!(output.contains("/mcL (!)"));
        assert!(!output.contains("- Elevated"));
    }

    #[test]
    fn json_report_serializes() {
        let output = render_record(&sample_record(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["risk"], serde_json::json!("High"));
        assert_eq!(value["metrics"]["wbc"], serde_json::json!(11_500.0));
        assert_eq!(value["findings"].as_array().unwrap().len(), 3);
        assert_eq!(value["warnings"], serde_json::json!(["wbc", "rbc"]));
    }
}
