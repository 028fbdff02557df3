//! One refresh cycle over a batch of funds.
//!
//! Batch checks (backoff, configuration) run first and abort the whole cycle.
//! After that every fund is estimated concurrently and fails on its own; a
//! failed fund keeps its last good estimate.

use crate::core::accuracy::AccuracyHistory;
use crate::core::backoff::NetworkBackoff;
use crate::core::error::{EstimateError, RefreshError};
use crate::core::estimator::{FundEstimate, StrategyVersion, ValuationSource, estimate};
use crate::core::holdings::FundHoldingsSnapshot;
use crate::core::intraday::{IntradayPoint, IntradayRecorder};
use crate::core::quote::{OfficialEstimate, QuoteMap};
use crate::core::selector::{RecordGate, Selection, ValuationMode};
use crate::core::session::trading_day;
use crate::core::source::{
    BestSourceStore, HoldingsProvider, OfficialEstimateProvider, QuoteProvider,
};
use chrono::{DateTime, FixedOffset};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_QUOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// What a caller sees for one fund after a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FundOutcome {
    pub code: String,
    pub latest: Option<FundEstimate>,
    pub previous: Option<FundEstimate>,
    pub error: Option<EstimateError>,
}

#[derive(Default)]
struct BookEntry {
    latest: Option<FundEstimate>,
    previous: Option<FundEstimate>,
}

/// Latest and previous accepted estimate per fund.
#[derive(Default)]
pub struct EstimateBook {
    entries: Mutex<HashMap<String, BookEntry>>,
}

impl EstimateBook {
    fn settle(&self, code: &str, result: Result<FundEstimate, EstimateError>) -> FundOutcome {
        let mut entries = self.entries.lock().expect("estimate book poisoned");
        let entry = entries.entry(code.to_string()).or_default();
        let error = match result {
            Ok(estimate) => {
                entry.previous = entry.latest.replace(estimate);
                None
            }
            Err(e) => Some(e),
        };
        FundOutcome {
            code: code.to_string(),
            latest: entry.latest.clone(),
            previous: entry.previous.clone(),
            error,
        }
    }

    pub fn latest(&self, code: &str) -> Option<FundEstimate> {
        let entries = self.entries.lock().expect("estimate book poisoned");
        entries.get(code).and_then(|e| e.latest.clone())
    }
}

pub struct Refresher {
    holdings: Arc<dyn HoldingsProvider>,
    quotes: Arc<dyn QuoteProvider>,
    official: Option<Arc<dyn OfficialEstimateProvider>>,
    best_source: Arc<dyn BestSourceStore>,
    recorder: Option<Arc<IntradayRecorder>>,
    accuracy: Option<Arc<AccuracyHistory>>,
    gate: RecordGate,
    backoff: NetworkBackoff,
    book: EstimateBook,
    mode: ValuationMode,
    strategy: StrategyVersion,
    quote_timeout: Duration,
}

impl Refresher {
    pub fn new(
        holdings: Arc<dyn HoldingsProvider>,
        quotes: Arc<dyn QuoteProvider>,
        best_source: Arc<dyn BestSourceStore>,
    ) -> Self {
        Self {
            holdings,
            quotes,
            official: None,
            best_source,
            recorder: None,
            accuracy: None,
            gate: RecordGate::new(),
            backoff: NetworkBackoff::default(),
            book: EstimateBook::default(),
            mode: ValuationMode::default(),
            strategy: StrategyVersion::default(),
            quote_timeout: DEFAULT_QUOTE_TIMEOUT,
        }
    }

    pub fn with_official(mut self, official: Arc<dyn OfficialEstimateProvider>) -> Self {
        self.official = Some(official);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<IntradayRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_accuracy(mut self, accuracy: Arc<AccuracyHistory>) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_mode(mut self, mode: ValuationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyVersion) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_backoff(mut self, backoff: NetworkBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_quote_timeout(mut self, timeout: Duration) -> Self {
        self.quote_timeout = timeout;
        self
    }

    pub fn book(&self) -> &EstimateBook {
        &self.book
    }

    pub fn backoff(&self) -> &NetworkBackoff {
        &self.backoff
    }

    fn check_batch(&self, codes: &[String]) -> Result<(), RefreshError> {
        if let Some(left) = self.backoff.remaining() {
            return Err(RefreshError::BackoffActive(left));
        }
        if self.mode == ValuationMode::Official && self.official.is_none() {
            return Err(RefreshError::InvalidConfiguration(
                "official mode without an official estimate provider".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for code in codes {
            if code.trim().is_empty() {
                return Err(RefreshError::InvalidConfiguration(
                    "empty fund code".to_string(),
                ));
            }
            if !seen.insert(code) {
                return Err(RefreshError::InvalidConfiguration(format!(
                    "fund {code} listed twice"
                )));
            }
        }
        Ok(())
    }

    /// Runs one cycle. Outcomes come back in the order of `codes`.
    pub async fn refresh(
        &self,
        codes: &[String],
        now: DateTime<FixedOffset>,
    ) -> Result<Vec<FundOutcome>, RefreshError> {
        self.check_batch(codes)?;
        debug!("Refreshing {} funds in {} mode", codes.len(), self.mode);

        let results = join_all(codes.iter().map(|code| self.refresh_fund(code, &now))).await;
        let outcomes: Vec<FundOutcome> = codes
            .iter()
            .zip(results)
            .map(|(code, result)| {
                if let Err(e) = &result {
                    warn!("Estimate failed for {code}: {e}");
                }
                self.book.settle(code, result)
            })
            .collect();
        info!(
            "Refresh cycle done: {}/{} funds updated",
            outcomes.iter().filter(|o| o.error.is_none()).count(),
            outcomes.len()
        );
        Ok(outcomes)
    }

    async fn fetch_official(&self, code: &str) -> Option<OfficialEstimate> {
        if !self.mode.wants_official() {
            return None;
        }
        match self.official.as_ref()?.fetch_official(code).await {
            Ok(official) => official,
            Err(e) => {
                debug!("Official estimate for {code} unavailable: {e:#}");
                None
            }
        }
    }

    async fn best_source_for(&self, code: &str) -> ValuationSource {
        match self.mode {
            ValuationMode::Smart => self.best_source.best_source(code).await,
            _ => ValuationSource::Official,
        }
    }

    async fn fetch_quotes(&self, snapshot: &FundHoldingsSnapshot) -> Result<QuoteMap, EstimateError> {
        let symbols = snapshot.quote_symbols();
        match tokio::time::timeout(self.quote_timeout, self.quotes.fetch_quotes(&symbols)).await {
            Ok(Ok(quotes)) => Ok(quotes),
            Ok(Err(e)) => Err(EstimateError::NetworkFailure(format!("{e:#}"))),
            Err(_) => Err(EstimateError::Timeout(self.quote_timeout)),
        }
    }

    async fn compute_holdings(
        &self,
        snapshot: &FundHoldingsSnapshot,
        now: &DateTime<FixedOffset>,
    ) -> Result<FundEstimate, EstimateError> {
        let quotes = self.fetch_quotes(snapshot).await?;
        let benchmark_return = snapshot
            .benchmark_symbol
            .as_ref()
            .and_then(|symbol| quotes.get(symbol))
            .and_then(|quote| quote.instantaneous_return());
        estimate(snapshot, &quotes, benchmark_return, self.strategy, now)
    }

    async fn refresh_fund(
        &self,
        code: &str,
        now: &DateTime<FixedOffset>,
    ) -> Result<FundEstimate, EstimateError> {
        let today = trading_day(now);
        let (snapshot, official) =
            tokio::join!(self.holdings.fetch_snapshot(code), self.fetch_official(code));
        let snapshot = snapshot.map_err(|e| {
            EstimateError::NetworkFailure(format!("holdings for {code}: {e:#}"))
        });
        if let Ok(snapshot) = &snapshot {
            self.settle_accuracy(snapshot).await;
        }

        let best = self.best_source_for(code).await;
        let chosen = match self.mode.select(code, official.as_ref(), today, best)? {
            Selection::UseOfficial(official) => {
                let context = snapshot.as_ref().ok();
                if self.mode == ValuationMode::Smart
                    && let Some(snapshot) = context
                {
                    // Shadow estimate so both sources keep an accuracy record
                    match self.compute_holdings(snapshot, now).await {
                        Ok(shadow) => self.record(&shadow, now).await,
                        Err(e) if e.is_transient() => {
                            warn!("Shadow holdings estimate for {code} failed: {e}");
                            self.backoff.trip(&e.to_string());
                        }
                        Err(e) => debug!("Shadow holdings estimate for {code} failed: {e}"),
                    }
                }
                FundEstimate::from_official(official, context)
            }
            Selection::ComputeHoldings { fallback } => {
                let computed = match &snapshot {
                    Ok(snapshot) => self.compute_holdings(snapshot, now).await,
                    Err(e) => Err(e.clone()),
                };
                if let Err(e) = &computed
                    && e.is_transient()
                    && snapshot.is_ok()
                {
                    self.backoff.trip(&e.to_string());
                }
                match (computed, fallback) {
                    (Ok(holdings), Some(official)) => {
                        self.record(&FundEstimate::from_official(official, snapshot.as_ref().ok()), now)
                            .await;
                        holdings
                    }
                    (Ok(holdings), None) => holdings,
                    (Err(e), Some(official)) => {
                        warn!("Holdings estimate for {code} failed ({e}), using official");
                        FundEstimate::from_official(official, snapshot.as_ref().ok())
                    }
                    (Err(e), None) => return Err(e),
                }
            }
        };

        self.record(&chosen, now).await;
        Ok(chosen)
    }

    async fn record(&self, estimate: &FundEstimate, now: &DateTime<FixedOffset>) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        if !self
            .gate
            .try_acquire(&estimate.code, estimate.valuation_source, now)
        {
            return;
        }
        let point = IntradayPoint::at(
            &estimate.code,
            estimate.valuation_source,
            estimate.gszzl,
            *now,
        );
        if let Err(e) = recorder.record(&point).await {
            warn!("Failed to record intraday point for {}: {e:#}", estimate.code);
        }
    }

    /// Scores the recorded sources once the fund's realized return for a
    /// recorded day is published.
    async fn settle_accuracy(&self, snapshot: &FundHoldingsSnapshot) {
        let (Some(accuracy), Some(recorder), Some(realized)) =
            (&self.accuracy, &self.recorder, &snapshot.realized)
        else {
            return;
        };
        if accuracy.get(&snapshot.code, realized.date).await.is_some() {
            return;
        }
        let points = recorder.read(&snapshot.code, realized.date).await;
        if points.is_empty() {
            return;
        }
        if let Err(e) = accuracy
            .record_realized(&snapshot.code, realized.date, realized.return_pct, &points)
            .await
        {
            warn!("Failed to record accuracy for {}: {e:#}", snapshot.code);
        }
    }
}
