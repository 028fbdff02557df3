//! Real-time quotes from the Sina `hq` feed.
//!
//! Each requested symbol comes back as one line:
//! `var hq_str_sh600519="name,open,prev_close,price,high,low,...,date,time,...";`

use crate::core::holdings::normalize_symbol;
use crate::core::quote::{Quote, QuoteMap};
use crate::core::session::{exchange_now, exchange_offset};
use crate::core::source::QuoteProvider;
use crate::providers::util::{USER_AGENT, with_retry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use tracing::{debug, instrument};

const SINA_REFERER: &str = "https://finance.sina.com.cn";
/// Symbols per request.
const BATCH_SIZE: usize = 80;

pub struct SinaQuoteProvider {
    url_template: String,
    client: reqwest::Client,
}

impl SinaQuoteProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_template(&format!("{}/list={{symbols}}", base_url.trim_end_matches('/')))
    }

    /// A provider for any endpoint speaking the same line format. The
    /// template's `{symbols}` is replaced with a comma separated list.
    pub fn with_template(url_template: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static(SINA_REFERER));
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            url_template: url_template.to_string(),
            client,
        })
    }

    async fn fetch_batch(&self, symbols: &[String]) -> Result<QuoteMap> {
        let url = self.url_template.replace("{symbols}", &symbols.join(","));
        debug!("Requesting quotes from {}", url);

        let response = with_retry(
            || async { self.client.get(&url).send().await?.error_for_status() },
            2,
            200,
        )
        .await
        .with_context(|| format!("Failed to fetch quotes from {url}"))?;
        let body = response
            .bytes()
            .await
            .context("Failed to read quote response")?;
        // The feed is GBK encoded; only names are affected by lossy decoding
        Ok(parse_quotes(&String::from_utf8_lossy(&body), exchange_now()))
    }
}

fn parse_observed_at(date: &str, time: &str) -> Option<DateTime<FixedOffset>> {
    let local = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").ok()?;
    exchange_offset().from_local_datetime(&local).single()
}

fn parse_line(line: &str, fallback: DateTime<FixedOffset>) -> Option<Quote> {
    let rest = &line[line.find("hq_str_")? + "hq_str_".len()..];
    let (raw_symbol, payload) = rest.split_once('=')?;
    let symbol = normalize_symbol(raw_symbol)?;
    let payload = payload.trim().trim_end_matches(';').trim_matches('"');
    let fields: Vec<&str> = payload.split(',').collect();
    if fields.len() < 4 {
        return None;
    }

    let prev_close: f64 = fields[2].trim().parse().ok()?;
    let price: f64 = fields[3].trim().parse().ok()?;
    // Zero price means no trade yet (pre-open or suspended)
    if !(price > 0.0 && prev_close > 0.0) {
        return None;
    }
    let observed_at = match (fields.get(30), fields.get(31)) {
        (Some(date), Some(time)) => parse_observed_at(date.trim(), time.trim()).unwrap_or(fallback),
        _ => fallback,
    };
    Some(Quote {
        symbol,
        name: fields[0].trim().to_string(),
        price,
        prev_close,
        observed_at,
    })
}

/// Parses a Sina response body. Unknown symbols come back with an empty
/// payload and are skipped.
pub fn parse_quotes(body: &str, fallback: DateTime<FixedOffset>) -> QuoteMap {
    body.lines()
        .filter_map(|line| parse_line(line, fallback))
        .map(|quote| (quote.symbol.clone(), quote))
        .collect()
}

#[async_trait]
impl QuoteProvider for SinaQuoteProvider {
    #[instrument(name = "SinaQuoteFetch", skip(self, symbols), fields(count = symbols.len()))]
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<QuoteMap> {
        let mut quotes = QuoteMap::new();
        if symbols.is_empty() {
            return Ok(quotes);
        }
        let batches = symbols.chunks(BATCH_SIZE).map(|batch| self.fetch_batch(batch));
        for batch in join_all(batches).await {
            quotes.extend(batch?);
        }
        debug!("Received {} of {} quotes", quotes.len(), symbols.len());
        Ok(quotes)
    }
}
