//! Persistent intraday valuation history.
//!
//! One point per `(fund, trading day, source, slot)`. Writes are upserts,
//! serialized per fund, and never let an older observation replace a newer
//! one.

use crate::core::cache::{KeyValueCollection, get_json, put_json, scan_json};
use crate::core::estimator::ValuationSource;
use crate::core::session::{align_to_slot, format_slot, trading_day};
use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const INTRADAY_COLLECTION: &str = "intraday";
/// Trading days of history kept by `prune`.
pub const RETENTION_DAYS: i64 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntradayPoint {
    pub fund_code: String,
    pub day: NaiveDate,
    /// Slot label, `HH:MM` exchange local.
    pub time: String,
    /// Estimated return in percent.
    pub value: f64,
    pub source: ValuationSource,
    pub observed_at: DateTime<FixedOffset>,
}

impl IntradayPoint {
    /// A point for the slot `observed_at` falls into.
    pub fn at(
        fund_code: &str,
        source: ValuationSource,
        value: f64,
        observed_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            fund_code: fund_code.to_string(),
            day: trading_day(&observed_at),
            time: format_slot(align_to_slot(&observed_at)),
            value,
            source,
            observed_at,
        }
    }

    fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.fund_code, self.day, self.source, self.time
        )
    }
}

fn day_prefix(code: &str, day: NaiveDate) -> String {
    format!("{code}|{day}|")
}

fn day_of_key(key: &str) -> Option<NaiveDate> {
    let raw = key.split('|').nth(1)?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

pub struct IntradayRecorder {
    collection: Arc<dyn KeyValueCollection>,
    fund_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IntradayRecorder {
    pub fn new(collection: Arc<dyn KeyValueCollection>) -> Self {
        Self {
            collection,
            fund_locks: Mutex::new(HashMap::new()),
        }
    }

    fn fund_lock(&self, code: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.fund_locks.lock().expect("fund lock map poisoned");
        Arc::clone(locks.entry(code.to_string()).or_default())
    }

    /// Upserts a point. Returns `false` when a newer observation already
    /// occupies the slot.
    pub async fn record(&self, point: &IntradayPoint) -> Result<bool> {
        let lock = self.fund_lock(&point.fund_code);
        let _guard = lock.lock().await;

        let key = point.key();
        if let Some(existing) = get_json::<IntradayPoint>(self.collection.as_ref(), &key).await
            && existing.observed_at > point.observed_at
        {
            debug!("Ignoring stale intraday write for {key}");
            return Ok(false);
        }
        put_json(self.collection.as_ref(), &key, point, None).await?;
        debug!("Recorded {key} = {:.4}", point.value);
        Ok(true)
    }

    /// The day's points ordered by slot.
    pub async fn read(&self, code: &str, day: NaiveDate) -> Vec<IntradayPoint> {
        let mut points: Vec<IntradayPoint> =
            scan_json(self.collection.as_ref(), &day_prefix(code, day))
                .await
                .into_iter()
                .map(|(_, point)| point)
                .collect();
        points.sort_by(|a, b| a.time.cmp(&b.time).then(a.source.cmp(&b.source)));
        points
    }

    /// Days with recorded points for a fund, oldest first.
    pub async fn days(&self, code: &str) -> Vec<NaiveDate> {
        self.collection
            .scan_prefix(format!("{code}|").as_bytes())
            .await
            .into_iter()
            .filter_map(|(key, _)| day_of_key(&String::from_utf8_lossy(&key)))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Today's points, or those of the most recent recorded day on or before
    /// today when nothing was recorded yet.
    pub async fn read_latest(
        &self,
        code: &str,
        today: NaiveDate,
    ) -> Option<(NaiveDate, Vec<IntradayPoint>)> {
        let day = self
            .days(code)
            .await
            .into_iter()
            .rev()
            .find(|day| *day <= today)?;
        Some((day, self.read(code, day).await))
    }

    /// Drops every point recorded on a day before `before`. Returns the number
    /// of points removed.
    pub async fn prune(&self, before: NaiveDate) -> usize {
        let stale: Vec<Vec<u8>> = self
            .collection
            .scan_prefix(b"")
            .await
            .into_iter()
            .map(|(key, _)| key)
            .filter(|key| day_of_key(&String::from_utf8_lossy(key)).is_some_and(|d| d < before))
            .collect();
        for key in &stale {
            self.collection.remove(key).await;
        }
        if !stale.is_empty() {
            debug!("Pruned {} intraday points before {before}", stale.len());
        }
        stale.len()
    }
}
