//! Blend weighting between holdings-driven and benchmark-proxy returns.
//!
//! The holdings signal gets a base weight by fund type, discounted as the
//! holdings report ages.

use crate::core::holdings::FundType;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

/// Reports younger than this are fully trusted.
pub const FRESH_DAYS: f64 = 45.0;
/// Age at which the discount bottoms out.
pub const STALE_DAYS: f64 = 365.0;
pub const FRESHNESS_FLOOR: f64 = 0.65;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendWeights {
    pub holdings: f64,
    pub proxy: f64,
}

impl BlendWeights {
    pub fn new(holdings: f64) -> Self {
        let holdings = holdings.clamp(0.0, 1.0);
        Self {
            holdings,
            proxy: 1.0 - holdings,
        }
    }

    pub fn pure_proxy() -> Self {
        Self::new(0.0)
    }
}

pub fn base_weight(fund_type: FundType) -> f64 {
    match fund_type {
        FundType::Index => 0.25,
        FundType::Mixed => 0.65,
        FundType::Equity => 0.80,
    }
}

/// Discount for a report of the given age; undefined ages count as fresh.
pub fn freshness_factor(age_days: Option<f64>) -> f64 {
    match age_days {
        Some(age) if age.is_finite() && age > FRESH_DAYS => {
            let decay = (age - FRESH_DAYS) / (STALE_DAYS - FRESH_DAYS) * (1.0 - FRESHNESS_FLOOR);
            (1.0 - decay).max(FRESHNESS_FLOOR)
        }
        _ => 1.0,
    }
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(23, 59, 59).expect("valid wall clock time"))
}

fn quarter_end(year: i32, quarter: u32) -> Option<NaiveDate> {
    if !(1..=4).contains(&quarter) {
        return None;
    }
    let (next_year, next_month) = if quarter == 4 {
        (year + 1, 1)
    } else {
        (year, quarter * 3 + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).map(|d| d - Duration::days(1))
}

fn first_year(label: &str) -> Option<i32> {
    let chars: Vec<char> = label.chars().collect();
    chars.windows(4).find_map(|w| {
        if w.iter().all(|c| c.is_ascii_digit()) {
            w.iter().collect::<String>().parse().ok()
        } else {
            None
        }
    })
}

fn parse_quarter_label(label: &str) -> Option<NaiveDate> {
    let upper = label.to_uppercase();
    let quarter = if let Some(idx) = upper.find("季度") {
        upper[..idx].chars().last()?.to_digit(10)?
    } else if let Some(idx) = upper.find('Q') {
        upper[idx + 1..].chars().next()?.to_digit(10)?
    } else {
        return None;
    };
    quarter_end(first_year(&upper)?, quarter)
}

fn parse_explicit_date(label: &str) -> Option<NaiveDate> {
    let head = label.split_whitespace().next()?;
    ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(head, fmt).ok())
}

/// Resolves a holdings-date label to the moment the report covers: quarter
/// labels map to the end of the quarter's last day.
pub fn resolve_holdings_date(label: &str) -> Option<NaiveDateTime> {
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    parse_explicit_date(label)
        .or_else(|| parse_quarter_label(label))
        .map(end_of_day)
}

pub fn report_age_days(label: Option<&str>, now: &DateTime<FixedOffset>) -> Option<f64> {
    let resolved = resolve_holdings_date(label?)?;
    let age = (now.naive_local() - resolved).num_seconds() as f64 / 86_400.0;
    Some(age.max(0.0))
}

pub fn blend_weights(
    fund_type: FundType,
    holdings_date: Option<&str>,
    now: &DateTime<FixedOffset>,
) -> BlendWeights {
    let factor = freshness_factor(report_age_days(holdings_date, now));
    BlendWeights::new(base_weight(fund_type) * factor)
}
