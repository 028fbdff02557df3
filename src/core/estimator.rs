//! Blended return estimator.
//!
//! Turns a holdings snapshot and a batch of live quotes into a fund-level
//! return estimate. The observed average return of the *matched* holdings
//! is rescaled across the whole equity sleeve, i.e. unpriced long-tail
//! holdings are assumed to move like the priced sample.

use crate::core::error::EstimateError;
use crate::core::freshness::{BlendWeights, blend_weights};
use crate::core::holdings::FundHoldingsSnapshot;
use crate::core::quote::{OfficialEstimate, QuoteMap};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValuationSource {
    Official,
    Holdings,
}

impl Display for ValuationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ValuationSource::Official => "official",
            ValuationSource::Holdings => "holdings",
        })
    }
}

impl FromStr for ValuationSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            // "eastmoney" is how older history files label the official feed
            "official" | "eastmoney" => Ok(ValuationSource::Official),
            "holdings" => Ok(ValuationSource::Holdings),
            _ => Err(anyhow::anyhow!("Invalid valuation source: {}", s)),
        }
    }
}

/// Versioned estimation strategies. `FullScale` is the frozen baseline that
/// backtests compare every candidate against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StrategyVersion {
    /// Matched holdings average scaled to the equity sleeve, no proxy blend.
    #[serde(rename = "v1-full-scale")]
    FullScale,
    /// Holdings/proxy blend weighted by fund type and report freshness.
    #[default]
    #[serde(rename = "v2-blended")]
    Blended,
}

impl StrategyVersion {
    pub const BASELINE: StrategyVersion = StrategyVersion::FullScale;

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyVersion::FullScale => "v1-full-scale",
            StrategyVersion::Blended => "v2-blended",
        }
    }

    pub fn weights(
        &self,
        snapshot: &FundHoldingsSnapshot,
        now: &DateTime<FixedOffset>,
    ) -> BlendWeights {
        match self {
            StrategyVersion::FullScale => BlendWeights::new(1.0),
            StrategyVersion::Blended => blend_weights(
                snapshot.fund_type,
                snapshot.holdings_date.as_deref(),
                now,
            ),
        }
    }
}

impl Display for StrategyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "v1-full-scale" | "v1" | "full-scale" => Ok(StrategyVersion::FullScale),
            "v2-blended" | "v2" | "blended" => Ok(StrategyVersion::Blended),
            _ => Err(anyhow::anyhow!("Invalid strategy version: {}", s)),
        }
    }
}

/// One fund's estimate for one refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundEstimate {
    pub code: String,
    pub name: Option<String>,
    /// Estimated NAV, known only when the base NAV is.
    pub gsz: Option<f64>,
    /// Estimated return in percent.
    pub gszzl: f64,
    pub gztime: String,
    /// Fraction of disclosed weight priced this cycle. Absent for official
    /// estimates.
    pub coverage: Option<f64>,
    pub cash_ratio: f64,
    pub holdings_date: Option<String>,
    pub base_nav: Option<f64>,
    pub valuation_source: ValuationSource,
    pub benchmark_symbol: Option<String>,
    pub strategy_version: Option<StrategyVersion>,
    pub quote_time: Option<DateTime<FixedOffset>>,
}

impl FundEstimate {
    pub fn from_official(
        official: &OfficialEstimate,
        snapshot: Option<&FundHoldingsSnapshot>,
    ) -> Self {
        FundEstimate {
            code: official.code.clone(),
            name: official
                .name
                .clone()
                .or_else(|| snapshot.and_then(|s| s.name.clone())),
            gsz: Some(official.gsz),
            gszzl: official.gszzl,
            gztime: official.gztime.clone(),
            coverage: None,
            cash_ratio: snapshot.map_or(0.0, |s| s.cash_ratio.clamp(0.0, 1.0)),
            holdings_date: snapshot.and_then(|s| s.holdings_date.clone()),
            base_nav: official.dwjz.or_else(|| snapshot.and_then(|s| s.base_nav)),
            valuation_source: ValuationSource::Official,
            benchmark_symbol: snapshot.and_then(|s| s.benchmark_symbol.clone()),
            strategy_version: None,
            quote_time: None,
        }
    }
}

/// Combines the two return legs. An undefined holdings leg gives the whole
/// weight to the proxy.
pub fn blend_returns(
    holdings_driven: Option<f64>,
    proxy_driven: f64,
    weights: BlendWeights,
) -> f64 {
    let weights = if holdings_driven.is_some() {
        weights
    } else {
        BlendWeights::pure_proxy()
    };
    holdings_driven.unwrap_or(0.0) * weights.holdings + proxy_driven * weights.proxy
}

/// Estimates a fund's current return from its holdings and live quotes.
///
/// `benchmark_return` is the proxy leg as a fraction; when absent or not
/// finite the matched holdings average stands in for it.
pub fn estimate(
    snapshot: &FundHoldingsSnapshot,
    quotes: &QuoteMap,
    benchmark_return: Option<f64>,
    strategy: StrategyVersion,
    now: &DateTime<FixedOffset>,
) -> Result<FundEstimate, EstimateError> {
    if snapshot.holdings.is_empty() {
        return Err(EstimateError::HoldingsEmpty(snapshot.code.clone()));
    }

    let mut matched_weight = 0.0;
    let mut matched_contribution = 0.0;
    let mut quote_time: Option<DateTime<FixedOffset>> = None;
    for holding in &snapshot.holdings {
        let Some(quote) = quotes.get(&holding.symbol) else {
            continue;
        };
        let Some(ret) = quote.instantaneous_return() else {
            continue;
        };
        matched_weight += holding.weight;
        matched_contribution += holding.weight * ret;
        if quote_time.is_none_or(|t| quote.observed_at > t) {
            quote_time = Some(quote.observed_at);
        }
    }

    let disclosed = snapshot.disclosed_weight();
    let coverage = if disclosed > 0.0 {
        matched_weight / disclosed
    } else {
        0.0
    };
    if coverage <= 0.0 {
        return Err(EstimateError::NoQuoteCoverage(snapshot.code.clone()));
    }

    let equity_ratio = 1.0 - snapshot.cash_ratio.clamp(0.0, 1.0);
    let matched_average = (matched_weight > 0.0).then(|| matched_contribution / matched_weight);
    let holdings_driven = matched_average.map(|avg| avg * equity_ratio);
    let proxy_return = benchmark_return
        .filter(|r| r.is_finite())
        .or(matched_average)
        .unwrap_or(0.0);
    let proxy_driven = proxy_return * equity_ratio;

    let weights = strategy.weights(snapshot, now);
    let final_return = blend_returns(holdings_driven, proxy_driven, weights);

    let stamp = quote_time.unwrap_or(*now);
    Ok(FundEstimate {
        code: snapshot.code.clone(),
        name: snapshot.name.clone(),
        gsz: snapshot.base_nav.map(|nav| nav * (1.0 + final_return)),
        gszzl: final_return * 100.0,
        gztime: stamp.format("%Y-%m-%d %H:%M").to_string(),
        coverage: Some(coverage),
        cash_ratio: snapshot.cash_ratio.clamp(0.0, 1.0),
        holdings_date: snapshot.holdings_date.clone(),
        base_nav: snapshot.base_nav,
        valuation_source: ValuationSource::Holdings,
        benchmark_symbol: snapshot.benchmark_symbol.clone(),
        strategy_version: Some(strategy),
        quote_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::holdings::{FundType, Holding};
    use crate::core::quote::Quote;
    use crate::core::session::exchange_offset;
    use chrono::TimeZone;

    fn now() -> DateTime<FixedOffset> {
        exchange_offset()
            .with_ymd_and_hms(2025, 1, 15, 10, 30, 0)
            .unwrap()
    }

    fn holding(symbol: &str, weight: f64) -> Holding {
        Holding {
            symbol: symbol.into(),
            weight,
            name: None,
            industry: None,
        }
    }

    fn snapshot(holdings: Vec<Holding>, cash_ratio: f64) -> FundHoldingsSnapshot {
        FundHoldingsSnapshot {
            code: "000001".into(),
            name: Some("Test Fund".into()),
            holdings,
            cash_ratio,
            base_nav: Some(1.0),
            holdings_date: Some("2024Q4".into()),
            fund_type: FundType::Equity,
            benchmark_symbol: None,
            stale: false,
            cached_at: None,
            realized: None,
        }
    }

    fn quote(symbol: &str, price: f64, prev_close: f64, minute: u32) -> (String, Quote) {
        (
            symbol.to_string(),
            Quote {
                symbol: symbol.into(),
                name: symbol.into(),
                price,
                prev_close,
                observed_at: exchange_offset()
                    .with_ymd_and_hms(2025, 1, 15, 10, minute, 0)
                    .unwrap(),
            },
        )
    }

    #[test]
    fn test_single_holding_scenario() {
        let snap = snapshot(vec![holding("sh600000", 0.6)], 0.1);
        let quotes = QuoteMap::from([quote("sh600000", 10.2, 10.0, 25)]);

        let est = estimate(&snap, &quotes, None, StrategyVersion::Blended, &now()).unwrap();
        // holdings-driven = 0.02 * 0.9; the self-fallback proxy is identical
        assert!((est.gszzl - 1.8).abs() < 1e-9, "{}", est.gszzl);
        assert!(est.gszzl > 1.0 && est.gszzl < 2.2);
        assert!((est.gsz.unwrap() - 1.018).abs() < 1e-9);
        assert_eq!(est.coverage, Some(1.0));
        assert_eq!(est.valuation_source, ValuationSource::Holdings);
        assert_eq!(est.strategy_version, Some(StrategyVersion::Blended));
        assert_eq!(est.gztime, "2025-01-15 10:25");
    }

    #[test]
    fn test_benchmark_leg_is_blended() {
        let snap = snapshot(vec![holding("sh600000", 0.6)], 0.1);
        let quotes = QuoteMap::from([quote("sh600000", 10.2, 10.0, 25)]);

        // equity weight 0.8 (fresh report): 0.8 * 0.018 + 0.2 * (0.01 * 0.9)
        let est = estimate(&snap, &quotes, Some(0.01), StrategyVersion::Blended, &now()).unwrap();
        assert!((est.gszzl - (0.8 * 1.8 + 0.2 * 0.9)).abs() < 1e-9);

        // The baseline ignores the proxy leg entirely
        let base = estimate(&snap, &quotes, Some(0.01), StrategyVersion::FullScale, &now()).unwrap();
        assert!((base.gszzl - 1.8).abs() < 1e-9);

        // Non-finite benchmark falls back to the matched average
        let nan = estimate(&snap, &quotes, Some(f64::NAN), StrategyVersion::Blended, &now()).unwrap();
        assert!((nan.gszzl - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_zero_quotes_fail_with_no_coverage() {
        let snap = snapshot(vec![holding("sh600000", 0.6)], 0.1);
        let err = estimate(&snap, &QuoteMap::new(), None, StrategyVersion::Blended, &now())
            .unwrap_err();
        assert_eq!(err, EstimateError::NoQuoteCoverage("000001".into()));
    }

    #[test]
    fn test_empty_holdings_fail() {
        let snap = snapshot(vec![], 0.1);
        let err = estimate(&snap, &QuoteMap::new(), Some(0.01), StrategyVersion::Blended, &now())
            .unwrap_err();
        assert_eq!(err, EstimateError::HoldingsEmpty("000001".into()));
    }

    #[test]
    fn test_coverage_is_matched_over_disclosed() {
        let snap = snapshot(
            vec![
                holding("sh600000", 0.10),
                holding("sz000001", 0.05),
                holding("sz300750", 0.05),
                holding("sh601318", 0.04),
            ],
            0.0,
        );
        let quotes = QuoteMap::from([
            quote("sh600000", 10.1, 10.0, 20),
            quote("sz300750", 99.0, 100.0, 29),
            // unusable previous close does not count as matched
            quote("sh601318", 50.0, 0.0, 30),
        ]);
        let est = estimate(&snap, &quotes, None, StrategyVersion::FullScale, &now()).unwrap();
        assert!((est.coverage.unwrap() - 0.15 / 0.24).abs() < 1e-12);
        // weighted average of +1% (0.10) and -1% (0.05)
        let expected = (0.10 * 0.01 + 0.05 * -0.01) / 0.15 * 100.0;
        assert!((est.gszzl - expected).abs() < 1e-9);
        // max observed_at among matched quotes only
        assert_eq!(est.quote_time.unwrap().format("%H:%M").to_string(), "10:29");
    }

    #[test]
    fn test_cash_ratio_is_clamped() {
        let quotes = QuoteMap::from([quote("sh600000", 11.0, 10.0, 0)]);

        let negative = snapshot(vec![holding("sh600000", 0.5)], -0.3);
        let est = estimate(&negative, &quotes, None, StrategyVersion::FullScale, &now()).unwrap();
        assert!((est.gszzl - 10.0).abs() < 1e-9);
        assert_eq!(est.cash_ratio, 0.0);

        let over = snapshot(vec![holding("sh600000", 0.5)], 1.7);
        let est = estimate(&over, &quotes, None, StrategyVersion::FullScale, &now()).unwrap();
        assert_eq!(est.gszzl, 0.0);
    }

    #[test]
    fn test_missing_base_nav_leaves_gsz_undefined() {
        let mut snap = snapshot(vec![holding("sh600000", 0.6)], 0.1);
        snap.base_nav = None;
        let quotes = QuoteMap::from([quote("sh600000", 10.2, 10.0, 25)]);
        let est = estimate(&snap, &quotes, None, StrategyVersion::Blended, &now()).unwrap();
        assert!(est.gsz.is_none());
    }

    #[test]
    fn test_blend_is_continuous_as_holdings_weight_vanishes() {
        let proxy_driven = 0.004;
        let holdings_driven = Some(0.018);
        let mut last_gap = f64::INFINITY;
        for w in [0.5, 0.1, 0.01, 1e-4, 1e-8] {
            let blended = blend_returns(holdings_driven, proxy_driven, BlendWeights::new(w));
            let gap = (blended - proxy_driven).abs();
            assert!(gap < last_gap);
            last_gap = gap;
        }
        assert!(last_gap < 1e-9);
        assert_eq!(
            blend_returns(holdings_driven, proxy_driven, BlendWeights::new(0.0)),
            proxy_driven
        );
        // undefined holdings leg forces the pure proxy
        assert_eq!(
            blend_returns(None, proxy_driven, BlendWeights::new(0.8)),
            proxy_driven
        );
    }

    #[test]
    fn test_official_conversion_keeps_snapshot_context() {
        let snap = snapshot(vec![holding("sh600000", 0.6)], 0.1);
        let official = OfficialEstimate {
            code: "000001".into(),
            name: None,
            gsz: 1.0123,
            gszzl: 1.23,
            gztime: "2025-01-15 10:30".into(),
            dwjz: None,
        };
        let est = FundEstimate::from_official(&official, Some(&snap));
        assert_eq!(est.valuation_source, ValuationSource::Official);
        assert_eq!(est.name.as_deref(), Some("Test Fund"));
        assert_eq!(est.base_nav, Some(1.0));
        assert!(est.coverage.is_none());
        assert!(est.strategy_version.is_none());
    }

    #[test]
    fn test_strategy_version_parsing() {
        assert_eq!("v2".parse::<StrategyVersion>().unwrap(), StrategyVersion::Blended);
        assert_eq!(
            "V1-Full-Scale".parse::<StrategyVersion>().unwrap(),
            StrategyVersion::FullScale
        );
        assert!("v3".parse::<StrategyVersion>().is_err());
        assert_eq!("eastmoney".parse::<ValuationSource>().unwrap(), ValuationSource::Official);
    }
}
