//! Holdings disclosure types and normalization.
//!
//! Raw holdings arrive either as free text typed by a user (one holding per
//! line) or as structured API records. Both end up as [`Holding`] values with
//! exchange-prefixed symbols and weights in the unit interval.

use crate::core::error::EstimateError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One disclosed position of a fund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    /// Fraction of fund NAV, always > 0.
    pub weight: f64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
}

/// How a structured record expresses its weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightUnit {
    Percent,
    Fraction,
}

impl Holding {
    /// Builds a holding from a structured record, rejecting unknown symbols
    /// and non-positive weights.
    pub fn from_record(
        symbol: &str,
        weight: f64,
        unit: WeightUnit,
        name: Option<String>,
        industry: Option<String>,
    ) -> Result<Self, EstimateError> {
        let symbol = normalize_symbol(symbol)
            .ok_or_else(|| EstimateError::MalformedInput(format!("unknown symbol '{symbol}'")))?;
        if !weight.is_finite() || weight <= 0.0 {
            return Err(EstimateError::MalformedInput(format!(
                "non-positive weight {weight} for {symbol}"
            )));
        }
        let weight = match unit {
            WeightUnit::Percent => weight / 100.0,
            WeightUnit::Fraction => weight,
        };
        Ok(Holding {
            symbol,
            weight,
            name: name.filter(|n| !n.trim().is_empty()),
            industry: industry.filter(|i| !i.trim().is_empty()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundType {
    #[default]
    Equity,
    Mixed,
    #[serde(alias = "etf")]
    Index,
}

impl FundType {
    /// Maps a free-text fund category (as published by fund data vendors)
    /// onto a fund type. Unknown categories are treated as equity funds.
    pub fn classify(label: &str) -> Self {
        let label = label.to_lowercase();
        if ["指数", "联接", "etf", "index"].iter().any(|k| label.contains(k)) {
            FundType::Index
        } else if ["混合", "mixed", "hybrid", "balanced"]
            .iter()
            .any(|k| label.contains(k))
        {
            FundType::Mixed
        } else {
            FundType::Equity
        }
    }
}

/// The official daily return published for a past trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealizedReturn {
    pub date: NaiveDate,
    pub return_pct: f64,
    pub nav: Option<f64>,
}

/// Everything the estimator needs to know about one fund for one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundHoldingsSnapshot {
    pub code: String,
    pub name: Option<String>,
    pub holdings: Vec<Holding>,
    pub cash_ratio: f64,
    pub base_nav: Option<f64>,
    pub holdings_date: Option<String>,
    #[serde(default)]
    pub fund_type: FundType,
    pub benchmark_symbol: Option<String>,
    #[serde(default)]
    pub stale: bool,
    pub cached_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub realized: Option<RealizedReturn>,
}

impl FundHoldingsSnapshot {
    pub fn disclosed_weight(&self) -> f64 {
        self.holdings.iter().map(|h| h.weight).sum()
    }

    /// Symbols to quote for this fund, benchmark included.
    pub fn quote_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.holdings.iter().map(|h| h.symbol.clone()).collect();
        if let Some(benchmark) = &self.benchmark_symbol
            && !symbols.contains(benchmark)
        {
            symbols.push(benchmark.clone());
        }
        symbols
    }
}

/// Converts a raw security code into its exchange-prefixed form.
///
/// Bare six digit codes are routed by their leading digit (`6` Shanghai,
/// `0`/`3` Shenzhen, `8`/`4` Beijing). Codes that already carry one of those
/// exchange tags pass through with the tag lower-cased.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let s = raw.trim();
    if !s.is_ascii() {
        return None;
    }
    let all_digits = |v: &str| v.len() == 6 && v.bytes().all(|b| b.is_ascii_digit());

    if all_digits(s) {
        let exchange = match s.as_bytes()[0] {
            b'6' => "sh",
            b'0' | b'3' => "sz",
            b'8' | b'4' => "bj",
            _ => return None,
        };
        return Some(format!("{exchange}{s}"));
    }

    if s.len() == 8 {
        let (tag, digits) = s.split_at(2);
        let tag = tag.to_ascii_lowercase();
        if matches!(tag.as_str(), "sh" | "sz" | "bj") && all_digits(digits) {
            return Some(format!("{tag}{digits}"));
        }
    }
    None
}

/// Parses a weight token. A trailing `%` or a value above 1 marks a
/// percentage; anything else is already a fraction.
fn parse_weight(token: &str) -> Option<f64> {
    let token = token.trim();
    let (number, is_percent) = match token.strip_suffix('%') {
        Some(stripped) => (stripped.trim(), true),
        None => (token, false),
    };
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    if is_percent || value > 1.0 {
        Some(value / 100.0)
    } else {
        Some(value)
    }
}

fn parse_holding_line(line: &str) -> Result<Holding, EstimateError> {
    let cleaned: String = line
        .trim()
        .chars()
        .map(|c| match c {
            ',' | '，' | ';' | '；' => ' ',
            other => other,
        })
        .collect();
    let cleaned = cleaned.trim();

    let (symbol, weight) = match cleaned.split_once(':') {
        Some((symbol, rest)) => (symbol.trim(), rest.split_whitespace().next()),
        None => {
            let mut tokens = cleaned.split_whitespace();
            (tokens.next().unwrap_or_default(), tokens.next())
        }
    };

    let normalized = normalize_symbol(symbol)
        .ok_or_else(|| EstimateError::MalformedInput(format!("unknown symbol in '{line}'")))?;
    let weight = weight
        .and_then(parse_weight)
        .ok_or_else(|| EstimateError::MalformedInput(format!("bad weight in '{line}'")))?;

    Ok(Holding {
        symbol: normalized,
        weight,
        name: None,
        industry: None,
    })
}

/// Parses free text into per-line outcomes, skipping blank lines.
pub fn parse_holdings_lines(text: &str) -> Vec<Result<Holding, EstimateError>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_holding_line)
        .collect()
}

/// Parses free text into holdings. Malformed lines are dropped.
pub fn parse_holdings_text(text: &str) -> Vec<Holding> {
    parse_holdings_lines(text)
        .into_iter()
        .filter_map(|res| match res {
            Ok(holding) => Some(holding),
            Err(e) => {
                debug!("Skipping holding line: {e}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_symbol_prefixes_bare_codes() {
        assert_eq!(normalize_symbol("600000"), Some("sh600000".to_string()));
        assert_eq!(normalize_symbol("000001"), Some("sz000001".to_string()));
        assert_eq!(normalize_symbol("300750"), Some("sz300750".to_string()));
        assert_eq!(normalize_symbol("830799"), Some("bj830799".to_string()));
        assert_eq!(normalize_symbol("430047"), Some("bj430047".to_string()));
    }

    #[test]
    fn test_normalize_symbol_passes_prefixed_and_rejects_others() {
        assert_eq!(normalize_symbol("sh600519"), Some("sh600519".to_string()));
        assert_eq!(normalize_symbol("SZ000858"), Some("sz000858".to_string()));
        assert_eq!(normalize_symbol("sh000300"), Some("sh000300".to_string()));
        assert_eq!(normalize_symbol("hk00700"), None);
        assert_eq!(normalize_symbol("AAPL"), None);
        assert_eq!(normalize_symbol("510300"), None);
        assert_eq!(normalize_symbol("60000"), None);
        assert_eq!(normalize_symbol("贵州茅台"), None);
    }

    #[test]
    fn test_parse_text_with_mixed_separators() {
        let text = "600519: 9.8%\n000858，6.5\n  300750 0.05 \n\nsh601318;4%";
        let holdings = parse_holdings_text(text);
        assert_eq!(holdings.len(), 4);
        assert_eq!(holdings[0].symbol, "sh600519");
        assert!((holdings[0].weight - 0.098).abs() < 1e-12);
        assert_eq!(holdings[1].symbol, "sz000858");
        assert!((holdings[1].weight - 0.065).abs() < 1e-12);
        assert_eq!(holdings[2].symbol, "sz300750");
        assert!((holdings[2].weight - 0.05).abs() < 1e-12);
        assert_eq!(holdings[3].symbol, "sh601318");
        assert!((holdings[3].weight - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_parse_text_discards_malformed_lines() {
        let text = "600519 0\n600000 -3\n600036 abc\nAAPL 5\n600016 NaN\n601398 2.5";
        let outcomes = parse_holdings_lines(text);
        assert_eq!(outcomes.len(), 6);
        assert_eq!(outcomes.iter().filter(|o| o.is_err()).count(), 5);

        let holdings = parse_holdings_text(text);
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].symbol, "sh601398");
        assert!((holdings[0].weight - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_round_trip_through_percentages() {
        let text = "600519 9.8\n000858 0.3%\n300750 0.12\nbj830799 1.5%";
        let first = parse_holdings_text(text);

        let reserialized: String = first
            .iter()
            .map(|h| format!("{}: {}%\n", h.symbol, h.weight * 100.0))
            .collect();
        let second = parse_holdings_text(&reserialized);

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.symbol, b.symbol);
            assert!((a.weight - b.weight).abs() < 1e-9, "{} vs {}", a.weight, b.weight);
        }
    }

    #[test]
    fn test_from_record_converts_units() {
        let h = Holding::from_record("600519", 8.5, WeightUnit::Percent, Some("茅台".into()), None)
            .unwrap();
        assert_eq!(h.symbol, "sh600519");
        assert!((h.weight - 0.085).abs() < 1e-12);
        assert_eq!(h.name.as_deref(), Some("茅台"));

        let h = Holding::from_record("sz000001", 0.2, WeightUnit::Fraction, None, Some(" ".into()))
            .unwrap();
        assert!((h.weight - 0.2).abs() < 1e-12);
        assert!(h.industry.is_none());

        assert!(Holding::from_record("00700", 5.0, WeightUnit::Percent, None, None).is_err());
        assert!(Holding::from_record("600519", 0.0, WeightUnit::Percent, None, None).is_err());
    }

    #[test]
    fn test_fund_type_classification() {
        assert_eq!(FundType::classify("指数型-股票"), FundType::Index);
        assert_eq!(FundType::classify("华泰柏瑞沪深300ETF联接A"), FundType::Index);
        assert_eq!(FundType::classify("混合型-偏股"), FundType::Mixed);
        assert_eq!(FundType::classify("股票型"), FundType::Equity);
        assert_eq!(FundType::classify(""), FundType::Equity);
    }

    #[test]
    fn test_quote_symbols_include_benchmark_once() {
        let snapshot = FundHoldingsSnapshot {
            code: "161725".into(),
            name: None,
            holdings: parse_holdings_text("600519 10\n000858 8"),
            cash_ratio: 0.05,
            base_nav: None,
            holdings_date: None,
            fund_type: FundType::Equity,
            benchmark_symbol: Some("sh000300".into()),
            stale: false,
            cached_at: None,
            realized: None,
        };
        assert_eq!(
            snapshot.quote_symbols(),
            vec!["sh600519", "sz000858", "sh000300"]
        );
        assert!((snapshot.disclosed_weight() - 0.18).abs() < 1e-12);
    }
}
