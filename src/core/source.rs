//! Seams to the outside world. The core only ever sees parsed records.

use crate::core::estimator::ValuationSource;
use crate::core::holdings::FundHoldingsSnapshot;
use crate::core::quote::{OfficialEstimate, QuoteMap};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait HoldingsProvider: Send + Sync {
    async fn fetch_snapshot(&self, code: &str) -> Result<FundHoldingsSnapshot>;
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Quotes keyed by normalized symbol. Symbols the feed does not know are
    /// simply absent from the map.
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<QuoteMap>;
}

#[async_trait]
pub trait OfficialEstimateProvider: Send + Sync {
    /// `Ok(None)` when the vendor publishes nothing for the fund.
    async fn fetch_official(&self, code: &str) -> Result<Option<OfficialEstimate>>;
}

#[async_trait]
pub trait BestSourceStore: Send + Sync {
    async fn best_source(&self, code: &str) -> ValuationSource;
}

/// A holdings disclosure together with the day it became public.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingsReport {
    pub published_on: NaiveDate,
    pub snapshot: FundHoldingsSnapshot,
}

/// One published daily NAV. `return_pct` is the vendor's daily change when
/// available; otherwise it is derived from consecutive NAVs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavRecord {
    pub date: NaiveDate,
    pub nav: f64,
    #[serde(default)]
    pub return_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub close: f64,
}

/// Historical inputs for backtest replay.
#[async_trait]
pub trait BacktestDataSource: Send + Sync {
    async fn holdings_reports(&self, code: &str) -> Result<Vec<HoldingsReport>>;
    async fn nav_history(&self, code: &str) -> Result<Vec<NavRecord>>;
    async fn daily_bars(&self, symbol: &str) -> Result<Vec<DailyBar>>;
}
