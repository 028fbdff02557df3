//! File-backed history for backtests.
//!
//! ```json
//! {
//!   "funds": {
//!     "161725": {
//!       "reports": [{"published_on": "2024-01-20", "snapshot": {...}}],
//!       "navs": [{"date": "2024-03-01", "nav": 1.02, "return_pct": 0.4}]
//!     }
//!   },
//!   "bars": {"sh600519": [{"date": "2024-03-01", "close": 1700.0}]}
//! }
//! ```

use crate::core::source::{BacktestDataSource, DailyBar, HoldingsReport, NavRecord};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct FundRecords {
    #[serde(default)]
    reports: Vec<HoldingsReport>,
    #[serde(default)]
    navs: Vec<NavRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JsonDataset {
    #[serde(default)]
    funds: HashMap<String, FundRecords>,
    #[serde(default)]
    bars: HashMap<String, Vec<DailyBar>>,
}

impl JsonDataset {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset: {}", path.display()))?;
        let dataset = Self::parse(&raw)
            .with_context(|| format!("Failed to parse dataset: {}", path.display()))?;
        debug!(
            "Loaded dataset with {} funds and {} bar series",
            dataset.funds.len(),
            dataset.bars.len()
        );
        Ok(dataset)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    fn fund(&self, code: &str) -> Result<&FundRecords> {
        self.funds
            .get(code)
            .ok_or_else(|| anyhow!("fund {code} is not in the dataset"))
    }
}

#[async_trait]
impl BacktestDataSource for JsonDataset {
    async fn holdings_reports(&self, code: &str) -> Result<Vec<HoldingsReport>> {
        Ok(self.fund(code)?.reports.clone())
    }

    async fn nav_history(&self, code: &str) -> Result<Vec<NavRecord>> {
        Ok(self.fund(code)?.navs.clone())
    }

    async fn daily_bars(&self, symbol: &str) -> Result<Vec<DailyBar>> {
        self.bars
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow!("no bars for {symbol}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DATASET: &str = r#"{
        "funds": {
            "161725": {
                "reports": [{
                    "published_on": "2024-01-20",
                    "snapshot": {
                        "code": "161725",
                        "name": "Liquor Index",
                        "holdings": [{"symbol": "sh600519", "weight": 0.15}],
                        "cash_ratio": 0.05,
                        "base_nav": null,
                        "holdings_date": "2023-12-31",
                        "fund_type": "index",
                        "benchmark_symbol": "sz399997",
                        "cached_at": null
                    }
                }],
                "navs": [
                    {"date": "2024-03-01", "nav": 1.02},
                    {"date": "2024-03-04", "nav": 1.03, "return_pct": 0.98}
                ]
            }
        },
        "bars": {
            "sh600519": [{"date": "2024-03-01", "close": 1700.0}]
        }
    }"#;

    #[tokio::test]
    async fn test_load_dataset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DATASET.as_bytes()).unwrap();
        let dataset = JsonDataset::load(file.path()).unwrap();

        let reports = dataset.holdings_reports("161725").await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].snapshot.holdings[0].weight, 0.15);
        assert!(!reports[0].snapshot.stale);

        let navs = dataset.nav_history("161725").await.unwrap();
        assert_eq!(navs[0].return_pct, None);
        assert_eq!(navs[1].return_pct, Some(0.98));

        assert_eq!(dataset.daily_bars("sh600519").await.unwrap().len(), 1);
        assert!(dataset.daily_bars("sz000001").await.is_err());
        assert!(dataset.nav_history("000001").await.is_err());
    }

    #[test]
    fn test_load_errors() {
        assert!(JsonDataset::load("/nonexistent/dataset.json").is_err());
        assert!(JsonDataset::parse("[1, 2]").is_err());
        assert!(JsonDataset::parse("{}").is_ok());
    }
}
