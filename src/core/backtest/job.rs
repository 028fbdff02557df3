//! Background backtest job with progress reporting and cancellation.

use super::metrics::Metrics;
use super::replay::{FundHistory, predict_day};
use crate::core::cache::{KeyValueCollection, get_json, put_json};
use crate::core::estimator::{StrategyVersion, ValuationSource};
use crate::core::intraday::IntradayRecorder;
use crate::core::session::{in_trading_window, parse_slot};
use crate::core::source::BacktestDataSource;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const BACKTEST_COLLECTION: &str = "backtest";
pub const DEFAULT_WINDOW_DAYS: usize = 30;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum BacktestStatus {
    Pending,
    Running,
    Complete,
    Failed(String),
}

impl BacktestStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, BacktestStatus::Complete | BacktestStatus::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub fund_code: String,
    pub name: Option<String>,
    #[serde(flatten)]
    pub metrics: Metrics,
    /// Frozen baseline scored on the same days.
    pub baseline: Option<Metrics>,
    /// Scores of values recorded live, per source.
    #[serde(default)]
    pub recorded: BTreeMap<ValuationSource, Metrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub day: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub strategy: StrategyVersion,
    pub baseline: StrategyVersion,
    pub window_days: usize,
    pub results: Vec<BacktestResult>,
}

impl BacktestReport {
    pub fn result_for(&self, code: &str) -> Option<&BacktestResult> {
        self.results.iter().find(|r| r.fund_code == code)
    }

    pub fn covers(&self, codes: &[String]) -> bool {
        codes.iter().all(|code| self.result_for(code).is_some())
    }
}

/// Progress envelope published on every state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestProgress {
    pub status: BacktestStatus,
    pub pending: bool,
    pub total: usize,
    pub completed: usize,
    pub updated_at: DateTime<Utc>,
    pub report: Option<BacktestReport>,
}

impl BacktestProgress {
    fn new(total: usize) -> Self {
        Self {
            status: BacktestStatus::Pending,
            pending: true,
            total,
            completed: 0,
            updated_at: Utc::now(),
            report: None,
        }
    }
}

/// Reports keyed by the day they were generated.
#[derive(Clone)]
pub struct ReportCache {
    collection: Arc<dyn KeyValueCollection>,
    ttl: Duration,
}

impl ReportCache {
    pub fn new(collection: Arc<dyn KeyValueCollection>, ttl: Duration) -> Self {
        Self { collection, ttl }
    }

    pub async fn get(&self, day: NaiveDate) -> Option<BacktestReport> {
        get_json(self.collection.as_ref(), &day.to_string()).await
    }

    pub async fn latest(&self) -> Option<BacktestReport> {
        let (_, raw) = self.collection.scan_prefix(b"").await.pop()?;
        serde_json::from_slice(&raw).ok()
    }

    pub async fn put(&self, report: &BacktestReport) -> Result<()> {
        put_json(
            self.collection.as_ref(),
            &report.day.to_string(),
            report,
            Some(self.ttl),
        )
        .await
        .context("Failed to cache backtest report")
    }
}

#[derive(Debug, Clone)]
pub struct FundUnderTest {
    pub code: String,
    pub name: Option<String>,
    pub benchmark_symbol: Option<String>,
}

pub struct Evaluator {
    data: Arc<dyn BacktestDataSource>,
    recorder: Option<Arc<IntradayRecorder>>,
    cache: Option<ReportCache>,
    strategy: StrategyVersion,
    window_days: usize,
}

pub struct BacktestHandle {
    progress: watch::Receiver<BacktestProgress>,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl BacktestHandle {
    pub fn progress(&self) -> BacktestProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BacktestProgress> {
        self.progress.clone()
    }

    /// Requests cancellation; takes effect before the next fund.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Waits for the job to finish and returns its final progress.
    pub async fn wait(self) -> BacktestProgress {
        if let Err(e) = self.task.await {
            warn!("Backtest task aborted: {e}");
        }
        self.progress.borrow().clone()
    }
}

impl Evaluator {
    pub fn new(data: Arc<dyn BacktestDataSource>, strategy: StrategyVersion) -> Self {
        Self {
            data,
            recorder: None,
            cache: None,
            strategy,
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }

    pub fn with_window(mut self, window_days: usize) -> Self {
        self.window_days = window_days.max(1);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<IntradayRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_cache(mut self, cache: ReportCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Spawns the job on the runtime and returns immediately.
    pub fn spawn(self, funds: Vec<FundUnderTest>, day: NaiveDate) -> BacktestHandle {
        let (tx, rx) = watch::channel(BacktestProgress::new(funds.len()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let task = tokio::spawn(async move {
            self.run(funds, day, &tx, &flag).await;
        });
        BacktestHandle {
            progress: rx,
            cancelled,
            task,
        }
    }

    async fn run(
        &self,
        funds: Vec<FundUnderTest>,
        day: NaiveDate,
        tx: &watch::Sender<BacktestProgress>,
        cancelled: &AtomicBool,
    ) {
        tx.send_modify(|p| {
            p.status = BacktestStatus::Running;
            p.updated_at = Utc::now();
        });
        info!(
            "Backtesting {} funds over {} days ({} vs {})",
            funds.len(),
            self.window_days,
            self.strategy,
            StrategyVersion::BASELINE
        );

        let mut results = Vec::new();
        for fund in &funds {
            if cancelled.load(Ordering::SeqCst) {
                info!("Backtest cancelled, discarding partial results");
                tx.send_modify(|p| {
                    p.status = BacktestStatus::Failed("cancelled".to_string());
                    p.pending = false;
                    p.updated_at = Utc::now();
                });
                return;
            }
            match self.evaluate_fund(fund, day).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => debug!("No scorable days for {}", fund.code),
                Err(e) => warn!("Backtest failed for {}: {e:#}", fund.code),
            }
            tx.send_modify(|p| {
                p.completed += 1;
                p.updated_at = Utc::now();
            });
        }

        let report = BacktestReport {
            day,
            generated_at: Utc::now(),
            strategy: self.strategy,
            baseline: StrategyVersion::BASELINE,
            window_days: self.window_days,
            results,
        };
        if let Some(cache) = &self.cache
            && let Err(e) = cache.put(&report).await
        {
            warn!("{e:#}");
        }
        tx.send_modify(|p| {
            p.status = BacktestStatus::Complete;
            p.pending = false;
            p.updated_at = Utc::now();
            p.report = Some(report);
        });
    }

    async fn load_history(&self, fund: &FundUnderTest) -> Result<FundHistory> {
        let reports = self.data.holdings_reports(&fund.code).await?;
        let navs = self.data.nav_history(&fund.code).await?;

        let mut symbols: Vec<String> = reports
            .iter()
            .flat_map(|r| r.snapshot.quote_symbols())
            .chain(fund.benchmark_symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();

        let mut bars = HashMap::new();
        for symbol in symbols {
            match self.data.daily_bars(&symbol).await {
                Ok(series) => {
                    bars.insert(symbol, series);
                }
                Err(e) => debug!("No bars for {symbol}: {e:#}"),
            }
        }

        let mut history = FundHistory::new(&fund.code, reports, navs, bars);
        if let Some(benchmark) = &fund.benchmark_symbol {
            for report in &mut history.reports {
                report
                    .snapshot
                    .benchmark_symbol
                    .get_or_insert_with(|| benchmark.clone());
            }
        }
        Ok(history)
    }

    /// Scores both strategies on the window ending at `until`, on the same days.
    pub async fn evaluate_fund(
        &self,
        fund: &FundUnderTest,
        until: NaiveDate,
    ) -> Result<Option<BacktestResult>> {
        let history = self.load_history(fund).await?;

        let mut samples = Vec::new();
        for day in history.window(until, self.window_days) {
            let Some(actual) = history.realized_return(day) else {
                continue;
            };
            if let (Ok(cand), Ok(base)) = (
                predict_day(&history, day, self.strategy),
                predict_day(&history, day, StrategyVersion::BASELINE),
            ) {
                samples.push((cand, base, actual));
            }
        }

        let recorded = self.score_recorded(&history).await;
        let Some((metrics, baseline)) = paired_metrics(&samples) else {
            return Ok(None);
        };
        let name = fund.name.clone().or_else(|| {
            history
                .reports
                .last()
                .and_then(|r| r.snapshot.name.clone())
        });
        Ok(Some(BacktestResult {
            fund_code: fund.code.clone(),
            name,
            metrics,
            baseline: Some(baseline),
            recorded,
        }))
    }

    /// Scores the last in-session value each source recorded per day.
    async fn score_recorded(&self, history: &FundHistory) -> BTreeMap<ValuationSource, Metrics> {
        let Some(recorder) = &self.recorder else {
            return BTreeMap::new();
        };
        let mut pairs: BTreeMap<ValuationSource, Vec<(f64, f64)>> = BTreeMap::new();
        for day in recorder.days(&history.code).await {
            let Some(actual) = history.realized_return(day) else {
                continue;
            };
            let mut last: BTreeMap<ValuationSource, f64> = BTreeMap::new();
            for point in recorder.read(&history.code, day).await {
                if parse_slot(&point.time).is_some_and(in_trading_window) {
                    last.insert(point.source, point.value);
                }
            }
            for (source, value) in last {
                pairs.entry(source).or_default().push((value, actual));
            }
        }
        pairs
            .into_iter()
            .filter_map(|(source, pairs)| Some((source, Metrics::from_pairs(&pairs)?)))
            .collect()
    }
}

/// Scores `(candidate, baseline, actual)` samples, keeping only days where
/// all three are finite so both strategies are measured on the same days.
fn paired_metrics(samples: &[(f64, f64, f64)]) -> Option<(Metrics, Metrics)> {
    let (candidate, baseline): (Vec<_>, Vec<_>) = samples
        .iter()
        .filter(|(cand, base, actual)| cand.is_finite() && base.is_finite() && actual.is_finite())
        .map(|(cand, base, actual)| ((*cand, *actual), (*base, *actual)))
        .unzip();
    Some((Metrics::from_pairs(&candidate)?, Metrics::from_pairs(&baseline)?))
}
