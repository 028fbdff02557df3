//! Vendor-published intraday estimates (`fundgz` JSONP feed).

use crate::core::quote::OfficialEstimate;
use crate::core::source::OfficialEstimateProvider;
use crate::providers::util::{USER_AGENT, with_retry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, error, instrument};

#[derive(Debug, Deserialize)]
struct FundgzResponse {
    fundcode: String,
    name: Option<String>,
    dwjz: Option<String>,
    gsz: String,
    gszzl: String,
    gztime: String,
}

pub struct EastmoneyProvider {
    base_url: String,
    client: reqwest::Client,
}

impl EastmoneyProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

/// Unwraps `jsonpgz({...});`. Unknown funds produce `jsonpgz();`.
fn strip_jsonp(body: &str) -> Option<&str> {
    let inner = body
        .trim()
        .strip_prefix("jsonpgz(")?
        .trim_end_matches(';')
        .strip_suffix(')')?
        .trim();
    (!inner.is_empty()).then_some(inner)
}

/// Parses a `fundgz` body. `Ok(None)` when the vendor has no estimate.
pub fn parse_fundgz(body: &str) -> Result<Option<OfficialEstimate>> {
    let Some(json) = strip_jsonp(body) else {
        return Ok(None);
    };
    let raw: FundgzResponse = match serde_json::from_str(json) {
        Ok(data) => data,
        Err(e) => {
            error!(error = ?e, response = %body, "Failed to parse official estimate");
            return Err(e).context("Failed to parse official estimate");
        }
    };
    let gsz: f64 = raw.gsz.trim().parse().context("Invalid gsz")?;
    let gszzl: f64 = raw.gszzl.trim().parse().context("Invalid gszzl")?;
    Ok(Some(OfficialEstimate {
        code: raw.fundcode,
        name: raw.name.filter(|n| !n.trim().is_empty()),
        gsz,
        gszzl,
        gztime: raw.gztime,
        dwjz: raw.dwjz.and_then(|v| v.trim().parse().ok()),
    }))
}

#[async_trait]
impl OfficialEstimateProvider for EastmoneyProvider {
    #[instrument(name = "OfficialEstimateFetch", skip(self), fields(code = %code))]
    async fn fetch_official(&self, code: &str) -> Result<Option<OfficialEstimate>> {
        let url = format!(
            "{}/js/{}.js?rt={}",
            self.base_url,
            code,
            Utc::now().timestamp_millis()
        );
        let response = with_retry(
            || async { self.client.get(&url).send().await?.error_for_status() },
            2,
            300,
        )
        .await
        .context("Official estimate request failed")?;

        let body = response
            .text()
            .await
            .context("Failed to get response text")?;
        let estimate = parse_fundgz(&body)?;
        debug!("Official estimate for {}: {:?}", code, estimate);
        Ok(estimate)
    }
}
