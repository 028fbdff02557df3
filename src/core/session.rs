//! Exchange clock: trading windows and intraday slot alignment.
//!
//! All times are exchange local (UTC+8). Trading windows are 09:15-11:30
//! (call auction included) and 13:00-15:00 on weekdays; exchange holidays
//! are not modelled.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc, Weekday};

const EXCHANGE_UTC_OFFSET_SECS: i32 = 8 * 3600;
const SLOT_MINUTES: u32 = 5;

pub fn exchange_offset() -> FixedOffset {
    FixedOffset::east_opt(EXCHANGE_UTC_OFFSET_SECS).expect("exchange offset is in range")
}

pub fn exchange_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&exchange_offset())
}

/// Trading day a timestamp belongs to.
pub fn trading_day(at: &DateTime<FixedOffset>) -> NaiveDate {
    at.with_timezone(&exchange_offset()).date_naive()
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("valid wall clock time")
}

/// Whether a wall-clock time falls inside one of the trading windows.
pub fn in_trading_window(time: NaiveTime) -> bool {
    (hm(9, 15) <= time && time <= hm(11, 30)) || (hm(13, 0) <= time && time <= hm(15, 0))
}

pub fn is_trading_time(at: &DateTime<FixedOffset>) -> bool {
    let local = at.with_timezone(&exchange_offset());
    !matches!(local.weekday(), Weekday::Sat | Weekday::Sun) && in_trading_window(local.time())
}

/// Rounds a timestamp up to the next 5-minute slot, ignoring seconds.
/// `10:01` and `10:05` both land on `10:05`.
pub fn align_to_slot(at: &DateTime<FixedOffset>) -> NaiveTime {
    let local = at.with_timezone(&exchange_offset());
    let total = local.hour() * 60 + local.minute();
    let aligned = total.div_ceil(SLOT_MINUTES) * SLOT_MINUTES;
    let aligned = aligned.min(23 * 60 + 55);
    hm(aligned / 60, aligned % 60)
}

pub fn format_slot(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub fn parse_slot(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}
