//! Append-only ledger of classified scans, plus the trend view derived from it.

use chrono::{NaiveDate, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

use crate::model::{Assessment, MetricSnapshot, RiskLevel, ScanRecord};

pub const DEFAULT_TREND_WINDOW: usize = 10;

/// Ordered collection of completed scans. Records are never edited or removed.
#[derive(Debug, Clone, Default)]
pub struct ScanHistory {
    records: Vec<ScanRecord>,
}

impl ScanHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = ScanRecord>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }

    /// Four demonstration scans from January 2025, the last one elevated.
    pub fn sample() -> Self {
        let seed = [
            ("SCAN-001", 10, (98.0, 5500.0, 4.8), RiskLevel::Low, "Normal parameters observed."),
            ("SCAN-002", 15, (97.0, 5800.0, 4.9), RiskLevel::Low, "Stable blood count."),
            ("SCAN-003", 22, (99.0, 6100.0, 5.0), RiskLevel::Low, "Optimal oxygen levels."),
            ("SCAN-004", 30, (96.0, 11_500.0, 3.9), RiskLevel::High, "Elevated WBC detected."),
        ];
        Self::with_records(seed.into_iter().filter_map(
            |(id, day, (oxygen, wbc, rbc), risk, summary)| {
                let timestamp = Utc
                    .from_local_datetime(&NaiveDate::from_ymd_opt(2025, 1, day)?.and_hms_opt(9, 0, 0)?)
                    .single()?;
                Some(ScanRecord::at(
                    id,
                    timestamp,
                    MetricSnapshot::new(oxygen, wbc, rbc),
                    Assessment::new(risk, summary),
                ))
            },
        ))
    }

    pub fn append(&mut self, record: ScanRecord) {
        debug!(id = %record.id, risk = %record.risk, total = self.records.len() + 1, "scan recorded");
        self.records.push(record);
    }

    /// Records in insertion order.
    pub fn all(&self) -> &[ScanRecord] {
        &self.records
    }

    /// Records newest first; the exact reverse of [`ScanHistory::all`].
    pub fn latest_first(&self) -> impl Iterator<Item = &ScanRecord> + '_ {
        self.records.iter().rev()
    }

    pub fn get(&self, id: &str) -> Option<&ScanRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn latest(&self) -> Option<&ScanRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The most recent `limit` scans in chronological order, for charting.
    pub fn trend(&self, limit: usize) -> Vec<TrendPoint> {
        let skip = self.records.len().saturating_sub(limit);
        self.records[skip..].iter().map(TrendPoint::from).collect()
    }
}

/// One plotted point of the trends view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    /// Short date label, e.g. `Jan 10`.
    pub label: String,
    pub oxygen: f64,
    pub wbc: f64,
    pub rbc: f64,
}

impl From<&ScanRecord> for TrendPoint {
    fn from(record: &ScanRecord) -> Self {
        Self {
            label: record.timestamp.format("%b %-d").to_string(),
            oxygen: record.metrics.oxygen,
            wbc: record.metrics.wbc,
            rbc: record.metrics.rbc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ScanRecord {
        ScanRecord::at(
            id,
            Utc::now(),
            MetricSnapshot::default(),
            Assessment::new(RiskLevel::Low, "fine"),
        )
    }

    #[test]
    fn preserves_insertion_order_and_reverse() {
        let mut history = ScanHistory::new();
        for id in ["A", "B", "C"] {
            history.append(record(id));
        }
        let forward: Vec<_> = history.all().iter().map(|r| r.id.as_str()).collect();
        let backward: Vec<_> = history.latest_first().map(|r| r.id.as_str()).collect();
        assert_eq!(forward, vec!["A", "B", "C"]);
        assert_eq!(backward, vec!["C", "B", "A"]);
    }

    #[test]
    fn keeps_duplicates() {
        let mut history = ScanHistory::new();
        history.append(record("SAME"));
        history.append(record("SAME"));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn sample_has_four_records_ending_high() {
        let history = ScanHistory::sample();
        assert_eq!(history.len(), 4);
        let last = history.latest().unwrap();
        assert_eq!(last.risk, RiskLevel::High);
        assert_eq!(last.metrics.wbc, 11_500.0);
        assert!(history.all().iter().all(|r| !r.summary.is_empty()));
        assert_eq!(history.get("SCAN-002").unwrap().metrics.oxygen, 97.0);
    }

    #[test]
    fn trend_keeps_most_recent_window() {
        let history = ScanHistory::sample();
        let points = history.trend(2);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].label, "Jan 22");
        assert_eq!(points[1].label, "Jan 30");
        assert_eq!(history.trend(DEFAULT_TREND_WINDOW).len(), 4);
        assert!(ScanHistory::new().trend(5).is_empty());
    }
}
