//! Point-in-time reconstruction of estimator inputs.
//!
//! Every lookup takes the evaluation day and only sees records dated on or
//! before it, so appending future data can never change a past prediction.

use crate::core::error::EstimateError;
use crate::core::estimator::{StrategyVersion, estimate};
use crate::core::quote::{Quote, QuoteMap};
use crate::core::session::exchange_offset;
use crate::core::source::{DailyBar, HoldingsReport, NavRecord};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct FundHistory {
    pub code: String,
    pub reports: Vec<HoldingsReport>,
    pub navs: Vec<NavRecord>,
    pub bars: HashMap<String, Vec<DailyBar>>,
}

impl FundHistory {
    pub fn new(
        code: &str,
        mut reports: Vec<HoldingsReport>,
        mut navs: Vec<NavRecord>,
        mut bars: HashMap<String, Vec<DailyBar>>,
    ) -> Self {
        reports.sort_by_key(|r| r.published_on);
        navs.sort_by_key(|n| n.date);
        for series in bars.values_mut() {
            series.sort_by_key(|b| b.date);
        }
        Self {
            code: code.to_string(),
            reports,
            navs,
            bars,
        }
    }

    /// The latest report already public on `day`.
    pub fn report_as_of(&self, day: NaiveDate) -> Option<&HoldingsReport> {
        self.reports.iter().rev().find(|r| r.published_on <= day)
    }

    /// Last published NAV strictly before `day`.
    pub fn base_nav_before(&self, day: NaiveDate) -> Option<&NavRecord> {
        self.navs.iter().rev().find(|n| n.date < day)
    }

    /// Close on `day` and the previous close, if the symbol traded that day.
    pub fn closes_on(&self, symbol: &str, day: NaiveDate) -> Option<(f64, f64)> {
        let series = self.bars.get(symbol)?;
        let idx = series.iter().rposition(|b| b.date <= day)?;
        if series[idx].date != day || idx == 0 {
            return None;
        }
        Some((series[idx].close, series[idx - 1].close))
    }

    pub fn bar_return(&self, symbol: &str, day: NaiveDate) -> Option<f64> {
        let (close, prev) = self.closes_on(symbol, day)?;
        (prev > 0.0).then(|| close / prev - 1.0)
    }

    /// Realized daily return in percent. Used as the label only.
    pub fn realized_return(&self, day: NaiveDate) -> Option<f64> {
        let record = self.navs.iter().find(|n| n.date == day)?;
        if let Some(pct) = record.return_pct.filter(|p| p.is_finite()) {
            return Some(pct);
        }
        let prev = self.base_nav_before(day)?;
        (prev.nav > 0.0).then(|| (record.nav / prev.nav - 1.0) * 100.0)
    }

    /// The last `window` NAV dates on or before `until`.
    pub fn window(&self, until: NaiveDate, window: usize) -> Vec<NaiveDate> {
        let dates: Vec<NaiveDate> = self
            .navs
            .iter()
            .map(|n| n.date)
            .filter(|date| *date <= until)
            .collect();
        let skip = dates.len().saturating_sub(window);
        dates.into_iter().skip(skip).collect()
    }
}

fn market_close(day: NaiveDate) -> Option<DateTime<FixedOffset>> {
    let close = day.and_time(NaiveTime::from_hms_opt(15, 0, 0)?);
    exchange_offset().from_local_datetime(&close).single()
}

/// Predicts the fund's return for `day`, in percent, from data available at
/// that day's close.
pub fn predict_day(
    history: &FundHistory,
    day: NaiveDate,
    strategy: StrategyVersion,
) -> Result<f64, EstimateError> {
    let now = market_close(day)
        .ok_or_else(|| EstimateError::MalformedInput(format!("unrepresentable day {day}")))?;
    let report = history
        .report_as_of(day)
        .ok_or_else(|| EstimateError::HoldingsEmpty(history.code.clone()))?;

    let mut snapshot = report.snapshot.clone();
    snapshot.base_nav = history.base_nav_before(day).map(|n| n.nav);

    let quotes: QuoteMap = snapshot
        .quote_symbols()
        .into_iter()
        .filter_map(|symbol| {
            let (price, prev_close) = history.closes_on(&symbol, day)?;
            let quote = Quote {
                symbol: symbol.clone(),
                name: symbol.clone(),
                price,
                prev_close,
                observed_at: now,
            };
            Some((symbol, quote))
        })
        .collect();
    let benchmark_return = snapshot
        .benchmark_symbol
        .as_deref()
        .and_then(|symbol| history.bar_return(symbol, day));

    estimate(&snapshot, &quotes, benchmark_return, strategy, &now).map(|e| e.gszzl)
}
