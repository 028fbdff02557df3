//! Live quotes and the official estimate feed.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Quotes for one batch, keyed by exchange-prefixed symbol. Missing symbols
/// are simply absent.
pub type QuoteMap = HashMap<String, Quote>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub prev_close: f64,
    pub observed_at: DateTime<FixedOffset>,
}

impl Quote {
    /// Return since the previous close, as a fraction. `None` when the
    /// previous close cannot anchor a return.
    pub fn instantaneous_return(&self) -> Option<f64> {
        if self.prev_close > 0.0 && self.price.is_finite() {
            Some((self.price - self.prev_close) / self.prev_close)
        } else {
            None
        }
    }
}

/// An estimate published by the fund data vendor itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficialEstimate {
    pub code: String,
    pub name: Option<String>,
    /// Estimated NAV.
    pub gsz: f64,
    /// Estimated return in percent.
    pub gszzl: f64,
    /// Estimate timestamp, `YYYY-MM-DD HH:MM` in exchange local time.
    pub gztime: String,
    /// Reference NAV the estimate was computed from.
    pub dwjz: Option<f64>,
}

impl OfficialEstimate {
    pub fn estimated_at(&self) -> Option<NaiveDateTime> {
        let raw = self.gztime.trim();
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
            .ok()
    }

    /// Only an estimate stamped on the current trading day counts.
    pub fn is_current(&self, today: NaiveDate) -> bool {
        self.estimated_at().is_some_and(|at| at.date() == today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn quote(price: f64, prev_close: f64) -> Quote {
        Quote {
            symbol: "sh600000".into(),
            name: "浦发银行".into(),
            price,
            prev_close,
            observed_at: FixedOffset::east_opt(8 * 3600)
                .unwrap()
                .with_ymd_and_hms(2024, 1, 3, 10, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn test_instantaneous_return() {
        let r = quote(10.2, 10.0).instantaneous_return().unwrap();
        assert!((r - 0.02).abs() < 1e-12);
        assert!(quote(10.2, 0.0).instantaneous_return().is_none());
    }

    #[test]
    fn test_official_estimate_freshness() {
        let estimate = OfficialEstimate {
            code: "161725".into(),
            name: None,
            gsz: 1.234,
            gszzl: 0.45,
            gztime: "2024-01-03 14:55".into(),
            dwjz: Some(1.2285),
        };
        assert!(estimate.is_current(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()));
        assert!(!estimate.is_current(NaiveDate::from_ymd_opt(2024, 1, 4).unwrap()));

        let garbled = OfficialEstimate {
            gztime: "soon".into(),
            ..estimate
        };
        assert!(!garbled.is_current(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()));
    }
}
