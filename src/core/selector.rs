//! Source reconciliation: which estimate a fund surfaces this cycle.

use crate::core::error::EstimateError;
use crate::core::estimator::ValuationSource;
use crate::core::quote::OfficialEstimate;
use crate::core::session::is_trading_time;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValuationMode {
    /// Only the vendor's published estimate.
    Official,
    /// Always the holdings-driven estimate.
    Holdings,
    /// The historically more accurate source, falling back to holdings.
    #[default]
    Smart,
}

impl Display for ValuationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ValuationMode::Official => "official",
            ValuationMode::Holdings => "holdings",
            ValuationMode::Smart => "smart",
        })
    }
}

impl FromStr for ValuationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "official" => Ok(ValuationMode::Official),
            "holdings" => Ok(ValuationMode::Holdings),
            "smart" => Ok(ValuationMode::Smart),
            _ => Err(anyhow::anyhow!("Invalid valuation mode: {}", s)),
        }
    }
}

/// Outcome of the selection policy for one fund.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection<'a> {
    UseOfficial(&'a OfficialEstimate),
    /// Compute the holdings-driven estimate. `fallback` is surfaced instead
    /// if that computation fails.
    ComputeHoldings {
        fallback: Option<&'a OfficialEstimate>,
    },
}

impl ValuationMode {
    /// Whether the official feed needs to be consulted at all.
    pub fn wants_official(&self) -> bool {
        !matches!(self, ValuationMode::Holdings)
    }

    pub fn select<'a>(
        &self,
        code: &str,
        official: Option<&'a OfficialEstimate>,
        today: NaiveDate,
        best_source: ValuationSource,
    ) -> Result<Selection<'a>, EstimateError> {
        let available = official.filter(|o| o.is_current(today));
        match self {
            ValuationMode::Official => select_official(code, available),
            ValuationMode::Holdings => Ok(Selection::ComputeHoldings { fallback: None }),
            ValuationMode::Smart => Ok(select_smart(available, best_source)),
        }
    }
}

fn select_official<'a>(
    code: &str,
    available: Option<&'a OfficialEstimate>,
) -> Result<Selection<'a>, EstimateError> {
    available
        .map(Selection::UseOfficial)
        .ok_or_else(|| EstimateError::OfficialUnavailable(code.to_string()))
}

fn select_smart(
    available: Option<&OfficialEstimate>,
    best_source: ValuationSource,
) -> Selection<'_> {
    match (best_source, available) {
        (ValuationSource::Official, Some(official)) => Selection::UseOfficial(official),
        (_, fallback) => Selection::ComputeHoldings { fallback },
    }
}

/// Bounds intraday write volume: writes for one `(fund, source)` are at
/// least a minute apart, and none happen outside trading hours. State is
/// process-local and starts empty on every restart.
#[derive(Default)]
pub struct RecordGate {
    last_write: Mutex<HashMap<(String, ValuationSource), i64>>,
}

const MIN_WRITE_GAP_SECS: i64 = 60;

impl RecordGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a write slot; `false` means skip recording.
    pub fn try_acquire(
        &self,
        code: &str,
        source: ValuationSource,
        now: &DateTime<FixedOffset>,
    ) -> bool {
        if !is_trading_time(now) {
            return false;
        }
        let at = now.timestamp();
        let mut last = self.last_write.lock().expect("record gate lock poisoned");
        let key = (code.to_string(), source);
        if let Some(prev) = last.get(&key)
            && at - prev < MIN_WRITE_GAP_SECS
        {
            debug!("Skipping intraday write for {code}/{source}: last write {}s ago", at - prev);
            return false;
        }
        last.insert(key, at);
        true
    }
}
