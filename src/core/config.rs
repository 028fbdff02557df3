use crate::core::error::RefreshError;
use crate::core::estimator::StrategyVersion;
use crate::core::holdings::FundType;
use crate::core::selector::ValuationMode;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const MIN_REFRESH_INTERVAL_SEC: u64 = 5;
pub const MAX_REFRESH_INTERVAL_SEC: u64 = 3600;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FundConfig {
    pub code: String,
    pub name: Option<String>,
    /// Index quoted as the proxy leg, e.g. `sh000300`.
    pub benchmark: Option<String>,
    pub fund_type: Option<FundType>,
    /// Hand-maintained holdings, one `symbol weight` per line. Replaces the
    /// holdings API for this fund.
    pub holdings: Option<String>,
    /// Report label or date of the custom holdings, e.g. `2024-12-31`.
    pub holdings_date: Option<String>,
    /// Cash ratio as a fraction, used with custom holdings.
    pub cash_ratio: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSource {
    #[default]
    Sina,
    Custom,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QuoteProviderConfig {
    #[serde(default)]
    pub source: QuoteSource,
    #[serde(default = "default_sina_url")]
    pub base_url: String,
    /// URL with a `{symbols}` placeholder, used when `source` is `custom`.
    pub custom_url_template: Option<String>,
    #[serde(default = "default_quote_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_sina_url() -> String {
    "https://hq.sinajs.cn".to_string()
}

fn default_quote_timeout_ms() -> u64 {
    5000
}

impl Default for QuoteProviderConfig {
    fn default() -> Self {
        Self {
            source: QuoteSource::Sina,
            base_url: default_sina_url(),
            custom_url_template: None,
            timeout_ms: default_quote_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HoldingsProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OfficialProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub quotes: QuoteProviderConfig,
    pub holdings: Option<HoldingsProviderConfig>,
    pub official: Option<OfficialProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            quotes: QuoteProviderConfig::default(),
            holdings: None,
            official: Some(OfficialProviderConfig {
                base_url: "https://fundgz.1234567.com.cn".to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BacktestConfig {
    #[serde(default = "default_window_days")]
    pub window_days: usize,
    /// JSON file with holdings reports, NAV history and daily bars.
    pub dataset_path: Option<String>,
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: u64,
}

fn default_window_days() -> usize {
    30
}

fn default_cache_ttl_hours() -> u64 {
    7 * 24
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            dataset_path: None,
            cache_ttl_hours: default_cache_ttl_hours(),
        }
    }
}

impl BacktestConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours * 3600)
    }
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_backoff_sec() -> u64 {
    15
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub funds: Vec<FundConfig>,
    #[serde(default)]
    pub valuation_mode: ValuationMode,
    #[serde(default)]
    pub strategy: StrategyVersion,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_sec: u64,
    #[serde(default = "default_backoff_sec")]
    pub backoff_sec: u64,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    pub data_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("io", "navcast", "navcast")
            .context("Could not determine project directories")
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn fund_codes(&self) -> Vec<String> {
        self.funds.iter().map(|f| f.code.clone()).collect()
    }

    pub fn fund(&self, code: &str) -> Option<&FundConfig> {
        self.funds.iter().find(|f| f.code == code)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_sec)
    }

    pub fn quote_timeout(&self) -> Duration {
        Duration::from_millis(self.providers.quotes.timeout_ms)
    }

    /// Checks everything a refresh cycle relies on before any fund is tried.
    pub fn validate(&self) -> Result<(), RefreshError> {
        let invalid = |msg: String| Err(RefreshError::InvalidConfiguration(msg));

        if !(MIN_REFRESH_INTERVAL_SEC..=MAX_REFRESH_INTERVAL_SEC)
            .contains(&self.refresh_interval_sec)
        {
            return invalid(format!(
                "refresh_interval_sec must be within {MIN_REFRESH_INTERVAL_SEC}..={MAX_REFRESH_INTERVAL_SEC}, got {}",
                self.refresh_interval_sec
            ));
        }
        let quotes = &self.providers.quotes;
        if quotes.source == QuoteSource::Custom {
            let template = quotes.custom_url_template.as_deref().unwrap_or("").trim();
            if template.is_empty() {
                return invalid("custom quote source needs custom_url_template".to_string());
            }
            if !template.contains("{symbols}") {
                return invalid(format!(
                    "custom_url_template must contain {{symbols}}: {template}"
                ));
            }
        }
        let needs_api = self.funds.iter().any(|f| f.holdings.is_none());
        let has_api = self
            .providers
            .holdings
            .as_ref()
            .is_some_and(|h| !h.base_url.trim().is_empty());
        if needs_api && !has_api {
            return invalid("providers.holdings.base_url is not set".to_string());
        }
        if let Some(fund) = self.funds.iter().find(|f| f.code.trim().is_empty()) {
            return invalid(format!("fund with empty code: {fund:?}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
funds:
  - code: "161725"
    benchmark: sz399997
    fund_type: index
  - code: "005827"
    name: "Blue Chip"
    holdings: |
      600519 9.8%
      000858 8.1
    cash_ratio: 0.08
valuation_mode: holdings
strategy: v1-full-scale
refresh_interval_sec: 10
providers:
  quotes:
    source: custom
    custom_url_template: "http://localhost:9000/q?list={symbols}"
  holdings:
    base_url: "http://localhost:8000"
backtest:
  window_days: 20
"#;

    #[test]
    fn test_config_deserialization() {
        let config: AppConfig = serde_yaml::from_str(SAMPLE).expect("Failed to deserialize");

        assert_eq!(config.funds.len(), 2);
        assert_eq!(config.funds[0].fund_type, Some(FundType::Index));
        assert_eq!(config.funds[0].benchmark.as_deref(), Some("sz399997"));
        assert!(config.funds[1].holdings.as_deref().unwrap().contains("600519"));
        assert_eq!(config.valuation_mode, ValuationMode::Holdings);
        assert_eq!(config.strategy, StrategyVersion::FullScale);
        assert_eq!(config.providers.quotes.source, QuoteSource::Custom);
        assert_eq!(config.providers.quotes.timeout_ms, 5000);
        assert_eq!(config.backtest.window_days, 20);
        assert_eq!(config.backtest.cache_ttl_hours, 168);
        assert_eq!(config.backoff_sec, 15);
        assert!(config.validate().is_ok());
        assert_eq!(config.fund_codes(), vec!["161725", "005827"]);
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = serde_yaml::from_str("funds: []").unwrap();
        assert_eq!(config.valuation_mode, ValuationMode::Smart);
        assert_eq!(config.strategy, StrategyVersion::Blended);
        assert_eq!(config.refresh_interval_sec, 30);
        assert_eq!(config.providers.quotes.base_url, "https://hq.sinajs.cn");
        assert!(config.providers.official.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.providers.quotes.custom_url_template = Some("  ".into());
        assert!(matches!(
            config.validate(),
            Err(RefreshError::InvalidConfiguration(_))
        ));

        config.providers.quotes.custom_url_template = Some("http://q/{list}".into());
        assert!(config.validate().is_err());

        let mut config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.providers.holdings = None;
        assert!(config.validate().is_err());

        let mut config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.refresh_interval_sec = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.funds.len(), 2);

        let err = AppConfig::load_from_path("/nonexistent/navcast.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
