//! Holdings disclosures from the holdings API (`GET /holdings?code=`).
//!
//! The last good snapshot per fund is kept in a collection. While the API is
//! failing, that copy is served with `stale` set and the fund is not asked
//! for again until its cooldown expires.

use crate::core::cache::{KeyValueCollection, get_json, put_json};
use crate::core::holdings::{FundHoldingsSnapshot, Holding, RealizedReturn, WeightUnit};
use crate::core::source::HoldingsProvider;
use crate::providers::util::{KeyedBackoff, USER_AGENT, with_retry};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

pub const HOLDINGS_COLLECTION: &str = "holdings";
const FAIL_BASE: Duration = Duration::from_secs(10);
const FAIL_MAX: Duration = Duration::from_secs(300);
/// A cached snapshot younger than this is served without asking the API.
const FRESH_FOR: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HoldingRecord {
    symbol: String,
    name: Option<String>,
    weight: Option<f64>,
    industry: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HoldingsResponse {
    code: String,
    name: Option<String>,
    holdings_date: Option<String>,
    /// Percent of NAV.
    cash_ratio: Option<f64>,
    base_nav: Option<f64>,
    #[serde(default)]
    holdings: Vec<HoldingRecord>,
    actual_zzl: Option<f64>,
    actual_date: Option<String>,
    actual_nav: Option<f64>,
    /// Unix seconds.
    cached_at: Option<f64>,
    #[serde(default)]
    stale: bool,
}

impl HoldingsResponse {
    fn into_snapshot(self) -> FundHoldingsSnapshot {
        let holdings = self
            .holdings
            .into_iter()
            .filter_map(|record| {
                let weight = record.weight?;
                match Holding::from_record(
                    &record.symbol,
                    weight,
                    WeightUnit::Percent,
                    record.name,
                    record.industry,
                ) {
                    Ok(holding) => Some(holding),
                    Err(e) => {
                        debug!("Skipping holding of {}: {}", self.code, e);
                        None
                    }
                }
            })
            .collect();

        let realized = match (self.actual_zzl, self.actual_date.as_deref()) {
            (Some(return_pct), Some(date)) => NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
                .ok()
                .map(|date| RealizedReturn {
                    date,
                    return_pct,
                    nav: self.actual_nav,
                }),
            _ => None,
        };
        let cached_at = self
            .cached_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp_millis((secs * 1000.0) as i64));

        FundHoldingsSnapshot {
            code: self.code,
            name: self.name.filter(|n| !n.trim().is_empty()),
            holdings,
            cash_ratio: self.cash_ratio.unwrap_or(0.0) / 100.0,
            base_nav: self.base_nav,
            holdings_date: self.holdings_date,
            fund_type: Default::default(),
            benchmark_symbol: None,
            stale: self.stale,
            cached_at,
            realized,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedSnapshot {
    fetched_at: DateTime<Utc>,
    snapshot: FundHoldingsSnapshot,
}

pub struct HoldingsApiProvider {
    base_url: String,
    client: reqwest::Client,
    cache: Arc<dyn KeyValueCollection>,
    backoff: KeyedBackoff,
}

impl HoldingsApiProvider {
    pub fn new(base_url: &str, cache: Arc<dyn KeyValueCollection>) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            cache,
            backoff: KeyedBackoff::new(FAIL_BASE, FAIL_MAX),
        })
    }

    async fn request(&self, code: &str) -> Result<FundHoldingsSnapshot> {
        let url = format!("{}/holdings?code={}", self.base_url, code);
        let response = with_retry(
            || async { self.client.get(&url).send().await?.error_for_status() },
            2,
            500,
        )
        .await
        .context("Holdings request failed")?;

        let response_text = response
            .text()
            .await
            .context("Failed to get response text")?;
        let payload: HoldingsResponse = match serde_json::from_str(&response_text) {
            Ok(data) => data,
            Err(e) => {
                error!(
                    error = ?e,
                    response = %response_text,
                    "Failed to parse holdings response"
                );
                return Err(e).context("Failed to parse holdings response");
            }
        };
        Ok(payload.into_snapshot())
    }

    fn stale_copy(cached: CachedSnapshot) -> FundHoldingsSnapshot {
        let mut snapshot = cached.snapshot;
        snapshot.stale = true;
        snapshot.cached_at = snapshot.cached_at.or(Some(cached.fetched_at));
        snapshot
    }
}

#[async_trait]
impl HoldingsProvider for HoldingsApiProvider {
    #[instrument(name = "HoldingsFetch", skip(self), fields(code = %code))]
    async fn fetch_snapshot(&self, code: &str) -> Result<FundHoldingsSnapshot> {
        let cached: Option<CachedSnapshot> = get_json(self.cache.as_ref(), code).await;
        if let Some(entry) = &cached {
            let age = Utc::now().signed_duration_since(entry.fetched_at);
            if age.to_std().is_ok_and(|age| age < FRESH_FOR) {
                debug!("Holdings cache hit for {}", code);
                return Ok(entry.snapshot.clone());
            }
        }

        if let Some(left) = self.backoff.remaining(code) {
            return match cached {
                Some(entry) => Ok(Self::stale_copy(entry)),
                None => Err(anyhow!("holdings for {code} backing off for {left:?}")),
            };
        }

        match self.request(code).await {
            Ok(snapshot) => {
                self.backoff.succeed(code);
                let entry = CachedSnapshot {
                    fetched_at: Utc::now(),
                    snapshot,
                };
                put_json(self.cache.as_ref(), code, &entry, None).await?;
                Ok(entry.snapshot)
            }
            Err(e) => {
                let delay = self.backoff.fail(code);
                warn!("Holdings fetch for {} failed, cooling down {:?}: {:#}", code, delay, e);
                match cached {
                    Some(entry) => Ok(Self::stale_copy(entry)),
                    None => Err(e),
                }
            }
        }
    }
}
