//! Per-fund accuracy record of the live estimate sources.
//!
//! Once a trading day's official return is published, the last value each
//! source recorded during the session is compared against it. The most
//! recent days decide which source a fund trusts in smart mode.

use crate::core::backtest::ReportCache;
use crate::core::cache::{KeyValueCollection, get_json, put_json, scan_json};
use crate::core::estimator::ValuationSource;
use crate::core::intraday::IntradayPoint;
use crate::core::session::{in_trading_window, parse_slot};
use crate::core::source::BestSourceStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const ACCURACY_COLLECTION: &str = "accuracy";
/// Recorded days considered by `best_source`.
pub const BEST_SOURCE_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceSample {
    pub predicted: f64,
    pub actual: f64,
}

impl SourceSample {
    pub fn error(&self) -> f64 {
        (self.predicted - self.actual).abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub fund_code: String,
    pub day: NaiveDate,
    pub samples: BTreeMap<ValuationSource, SourceSample>,
}

pub struct AccuracyHistory {
    collection: Arc<dyn KeyValueCollection>,
    reports: Option<ReportCache>,
}

fn key(code: &str, day: NaiveDate) -> String {
    format!("{code}|{day}")
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Holdings wins only with strictly lower error; a source without samples
/// loses to one with samples.
fn pick(official: Option<f64>, holdings: Option<f64>) -> Option<ValuationSource> {
    match (official, holdings) {
        (None, None) => None,
        (None, Some(_)) => Some(ValuationSource::Holdings),
        (Some(_), None) => Some(ValuationSource::Official),
        (Some(o), Some(h)) if h < o => Some(ValuationSource::Holdings),
        _ => Some(ValuationSource::Official),
    }
}

impl AccuracyHistory {
    pub fn new(collection: Arc<dyn KeyValueCollection>) -> Self {
        Self {
            collection,
            reports: None,
        }
    }

    /// Falls back to the latest cached backtest report for funds without
    /// recorded history.
    pub fn with_reports(mut self, reports: ReportCache) -> Self {
        self.reports = Some(reports);
        self
    }

    pub async fn get(&self, code: &str, day: NaiveDate) -> Option<AccuracyRecord> {
        get_json(self.collection.as_ref(), &key(code, day)).await
    }

    /// Records the day's outcome from its intraday points. Points outside the
    /// trading windows are ignored. Returns `None` when no source has an
    /// in-session point.
    pub async fn record_realized(
        &self,
        code: &str,
        day: NaiveDate,
        actual_pct: f64,
        points: &[IntradayPoint],
    ) -> Result<Option<AccuracyRecord>> {
        let mut in_session: Vec<&IntradayPoint> = points
            .iter()
            .filter(|p| p.day == day && parse_slot(&p.time).is_some_and(in_trading_window))
            .collect();
        in_session.sort_by(|a, b| a.time.cmp(&b.time));

        let mut samples = BTreeMap::new();
        for point in in_session {
            samples.insert(
                point.source,
                SourceSample {
                    predicted: point.value,
                    actual: actual_pct,
                },
            );
        }
        if samples.is_empty() {
            debug!("No in-session points to score for {code} on {day}");
            return Ok(None);
        }

        let record = AccuracyRecord {
            fund_code: code.to_string(),
            day,
            samples,
        };
        put_json(self.collection.as_ref(), &key(code, day), &record, None).await?;
        info!(
            "Recorded accuracy for {code} on {day}: {}",
            record
                .samples
                .iter()
                .map(|(source, s)| format!("{source}={:.3}", s.error()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Some(record))
    }

    /// Most recent records first, at most `limit`.
    pub async fn recent(&self, code: &str, limit: usize) -> Vec<AccuracyRecord> {
        let mut records: Vec<AccuracyRecord> =
            scan_json(self.collection.as_ref(), &format!("{code}|"))
                .await
                .into_iter()
                .map(|(_, record)| record)
                .collect();
        records.sort_by(|a: &AccuracyRecord, b| b.day.cmp(&a.day));
        records.truncate(limit);
        records
    }

    async fn from_history(&self, code: &str) -> Option<ValuationSource> {
        let records = self.recent(code, BEST_SOURCE_WINDOW).await;
        let errors = |source: ValuationSource| -> Vec<f64> {
            records
                .iter()
                .filter_map(|r| r.samples.get(&source).map(SourceSample::error))
                .collect()
        };
        pick(
            mean(&errors(ValuationSource::Official)),
            mean(&errors(ValuationSource::Holdings)),
        )
    }

    async fn from_backtest(&self, code: &str) -> Option<ValuationSource> {
        let report = self.reports.as_ref()?.latest().await?;
        let recorded = &report.result_for(code)?.recorded;
        pick(
            recorded.get(&ValuationSource::Official).map(|m| m.mae),
            recorded.get(&ValuationSource::Holdings).map(|m| m.mae),
        )
    }
}

#[async_trait]
impl BestSourceStore for AccuracyHistory {
    async fn best_source(&self, code: &str) -> ValuationSource {
        if let Some(source) = self.from_history(code).await {
            return source;
        }
        if let Some(source) = self.from_backtest(code).await {
            debug!("Best source for {code} taken from the latest backtest");
            return source;
        }
        ValuationSource::Official
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backtest::{BacktestReport, BacktestResult, Metrics};
    use crate::core::estimator::StrategyVersion;
    use crate::core::session::exchange_offset;
    use crate::store::memory::MemoryCollection;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn point(d: u32, h: u32, m: u32, source: ValuationSource, value: f64) -> IntradayPoint {
        let at = exchange_offset().with_ymd_and_hms(2024, 1, d, h, m, 0).unwrap();
        IntradayPoint::at("161725", source, value, at)
    }

    async fn record(history: &AccuracyHistory, d: u32, official: f64, holdings: f64) {
        let points = [
            point(d, 14, 55, ValuationSource::Official, official),
            point(d, 14, 55, ValuationSource::Holdings, holdings),
        ];
        history
            .record_realized("161725", day(d), 1.0, &points)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_record_uses_last_in_session_point() {
        let history = AccuracyHistory::new(Arc::new(MemoryCollection::new()));
        let points = [
            point(3, 10, 0, ValuationSource::Holdings, 0.2),
            point(3, 14, 55, ValuationSource::Holdings, 0.9),
            point(3, 15, 30, ValuationSource::Holdings, 3.0),
            point(3, 11, 0, ValuationSource::Official, 1.4),
        ];
        let record = history
            .record_realized("161725", day(3), 1.0, &points)
            .await
            .unwrap()
            .unwrap();

        assert!((record.samples[&ValuationSource::Holdings].error() - 0.1).abs() < 1e-9);
        assert!((record.samples[&ValuationSource::Official].error() - 0.4).abs() < 1e-9);
        assert_eq!(history.get("161725", day(3)).await, Some(record));
    }

    #[tokio::test]
    async fn test_nothing_recorded_without_session_points() {
        let history = AccuracyHistory::new(Arc::new(MemoryCollection::new()));
        let points = [point(3, 15, 30, ValuationSource::Holdings, 3.0)];
        assert!(
            history
                .record_realized("161725", day(3), 1.0, &points)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(history.best_source("161725").await, ValuationSource::Official);
    }

    #[tokio::test]
    async fn test_best_source_over_recent_days() {
        let history = AccuracyHistory::new(Arc::new(MemoryCollection::new()));
        // Older days favour official, the latest five favour holdings
        for d in 1..=3 {
            record(&history, d, 1.0, 5.0).await;
        }
        for d in 4..=8 {
            record(&history, d, 1.5, 1.1).await;
        }
        assert_eq!(history.best_source("161725").await, ValuationSource::Holdings);

        let recent = history.recent("161725", BEST_SOURCE_WINDOW).await;
        assert_eq!(recent[0].day, day(8));
        assert_eq!(recent.len(), 5);
    }

    #[test]
    fn test_tie_keeps_official() {
        assert_eq!(pick(Some(0.3), Some(0.3)), Some(ValuationSource::Official));
        assert_eq!(pick(Some(0.3), Some(0.29)), Some(ValuationSource::Holdings));
        assert_eq!(pick(None, None), None);
    }

    #[tokio::test]
    async fn test_source_without_samples_loses() {
        let history = AccuracyHistory::new(Arc::new(MemoryCollection::new()));
        let points = [point(3, 14, 0, ValuationSource::Holdings, 9.0)];
        history
            .record_realized("161725", day(3), 1.0, &points)
            .await
            .unwrap();
        assert_eq!(history.best_source("161725").await, ValuationSource::Holdings);
    }

    #[tokio::test]
    async fn test_falls_back_to_backtest_scores() {
        let reports = ReportCache::new(
            Arc::new(MemoryCollection::new()),
            Duration::from_secs(3600),
        );
        let metrics = |mae: f64| Metrics {
            mae,
            samples: 3,
            ..Default::default()
        };
        reports
            .put(&BacktestReport {
                day: day(9),
                generated_at: Utc::now(),
                strategy: StrategyVersion::Blended,
                baseline: StrategyVersion::BASELINE,
                window_days: 30,
                results: vec![BacktestResult {
                    fund_code: "161725".into(),
                    name: None,
                    metrics: metrics(0.3),
                    baseline: None,
                    recorded: BTreeMap::from([
                        (ValuationSource::Official, metrics(0.4)),
                        (ValuationSource::Holdings, metrics(0.2)),
                    ]),
                }],
            })
            .await
            .unwrap();

        let history =
            AccuracyHistory::new(Arc::new(MemoryCollection::new())).with_reports(reports);
        assert_eq!(history.best_source("161725").await, ValuationSource::Holdings);
        assert_eq!(history.best_source("000001").await, ValuationSource::Official);
    }
}
