use crate::core::config::FundConfig;
use crate::core::holdings::{FundHoldingsSnapshot, parse_holdings_text};
use crate::core::source::HoldingsProvider;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Applies per-fund settings from the config file on top of an upstream
/// holdings provider. Funds with hand-maintained holdings never reach
/// upstream.
pub struct ConfiguredHoldings {
    upstream: Option<Arc<dyn HoldingsProvider>>,
    funds: HashMap<String, FundConfig>,
}

impl ConfiguredHoldings {
    pub fn new(upstream: Option<Arc<dyn HoldingsProvider>>, funds: &[FundConfig]) -> Self {
        Self {
            upstream,
            funds: funds.iter().map(|f| (f.code.clone(), f.clone())).collect(),
        }
    }

    fn from_text(fund: &FundConfig, text: &str) -> FundHoldingsSnapshot {
        FundHoldingsSnapshot {
            code: fund.code.clone(),
            name: fund.name.clone(),
            holdings: parse_holdings_text(text),
            cash_ratio: fund.cash_ratio.unwrap_or(0.0),
            base_nav: None,
            holdings_date: fund.holdings_date.clone(),
            fund_type: fund.fund_type.unwrap_or_default(),
            benchmark_symbol: fund.benchmark.clone(),
            stale: false,
            cached_at: None,
            realized: None,
        }
    }
}

fn overlay(mut snapshot: FundHoldingsSnapshot, fund: &FundConfig) -> FundHoldingsSnapshot {
    if let Some(fund_type) = fund.fund_type {
        snapshot.fund_type = fund_type;
    }
    if fund.benchmark.is_some() {
        snapshot.benchmark_symbol = fund.benchmark.clone();
    }
    if snapshot.name.is_none() {
        snapshot.name = fund.name.clone();
    }
    if let Some(cash_ratio) = fund.cash_ratio {
        snapshot.cash_ratio = cash_ratio;
    }
    snapshot
}

#[async_trait]
impl HoldingsProvider for ConfiguredHoldings {
    async fn fetch_snapshot(&self, code: &str) -> Result<FundHoldingsSnapshot> {
        let fund = self.funds.get(code);
        if let Some(fund) = fund
            && let Some(text) = &fund.holdings
        {
            debug!("Using configured holdings for {}", code);
            return Ok(Self::from_text(fund, text));
        }
        let upstream = self
            .upstream
            .as_ref()
            .ok_or_else(|| anyhow!("no holdings source for {code}"))?;
        let snapshot = upstream.fetch_snapshot(code).await?;
        Ok(match fund {
            Some(fund) => overlay(snapshot, fund),
            None => snapshot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::holdings::FundType;

    struct Upstream;

    #[async_trait]
    impl HoldingsProvider for Upstream {
        async fn fetch_snapshot(&self, code: &str) -> Result<FundHoldingsSnapshot> {
            Ok(FundHoldingsSnapshot {
                code: code.to_string(),
                name: None,
                holdings: parse_holdings_text("600519 10"),
                cash_ratio: 0.05,
                base_nav: Some(1.2),
                holdings_date: Some("2024年4季度股票投资明细".into()),
                fund_type: FundType::Equity,
                benchmark_symbol: None,
                stale: false,
                cached_at: None,
                realized: None,
            })
        }
    }

    fn fund(code: &str) -> FundConfig {
        FundConfig {
            code: code.into(),
            name: Some("Liquor Index".into()),
            benchmark: Some("sz399997".into()),
            fund_type: Some(FundType::Index),
            holdings: None,
            holdings_date: None,
            cash_ratio: None,
        }
    }

    #[tokio::test]
    async fn test_overlay_on_upstream() {
        let provider = ConfiguredHoldings::new(Some(Arc::new(Upstream)), &[fund("161725")]);
        let snapshot = provider.fetch_snapshot("161725").await.unwrap();
        assert_eq!(snapshot.fund_type, FundType::Index);
        assert_eq!(snapshot.benchmark_symbol.as_deref(), Some("sz399997"));
        assert_eq!(snapshot.name.as_deref(), Some("Liquor Index"));
        assert_eq!(snapshot.cash_ratio, 0.05);
        assert_eq!(snapshot.base_nav, Some(1.2));

        let untouched = provider.fetch_snapshot("000001").await.unwrap();
        assert_eq!(untouched.fund_type, FundType::Equity);
    }

    #[tokio::test]
    async fn test_configured_text_wins() {
        let mut custom = fund("005827");
        custom.holdings = Some("600519 9.8%\n000858 8.1\nnot a line".into());
        custom.cash_ratio = Some(0.1);
        let provider = ConfiguredHoldings::new(None, &[custom]);

        let snapshot = provider.fetch_snapshot("005827").await.unwrap();
        assert_eq!(snapshot.holdings.len(), 2);
        assert_eq!(snapshot.cash_ratio, 0.1);
        assert!(provider.fetch_snapshot("161725").await.is_err());
    }
}
