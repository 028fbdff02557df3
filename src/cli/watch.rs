use super::{estimate, ui};
use crate::App;
use crate::core::error::RefreshError;
use crate::core::intraday::RETENTION_DAYS;
use crate::core::session::{exchange_now, is_trading_time, trading_day};
use anyhow::Result;
use chrono::{Duration, NaiveDate};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Refreshes every configured fund on the configured interval until Ctrl-C.
pub async fn run(app: &App) -> Result<()> {
    let codes = app.config.fund_codes();
    if codes.is_empty() {
        println!("No funds configured.");
        return Ok(());
    }

    let mut ticker = tokio::time::interval(app.config.refresh_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut pruned_on: Option<NaiveDate> = None;
    info!(
        "Watching {} funds every {:?}",
        codes.len(),
        app.config.refresh_interval()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let now = exchange_now();
        let today = trading_day(&now);
        if pruned_on != Some(today) {
            app.recorder.prune(today - Duration::days(RETENTION_DAYS)).await;
            pruned_on = Some(today);
        }

        match app.refresher.refresh(&codes, now).await {
            Ok(outcomes) => {
                ui::print_separator();
                let session = if is_trading_time(&now) {
                    "trading"
                } else {
                    "closed"
                };
                println!(
                    "{} {}",
                    ui::style_text(&now.format("%Y-%m-%d %H:%M:%S").to_string(), ui::StyleType::Label),
                    ui::style_text(session, ui::StyleType::Subtle)
                );
                println!("{}", estimate::outcome_table(&outcomes));
            }
            Err(RefreshError::BackoffActive(left)) => {
                println!(
                    "{}",
                    ui::style_text(
                        &format!("Quote feed unavailable, retrying in {}s", left.as_secs().max(1)),
                        ui::StyleType::Warning
                    )
                );
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = app.store.flush() {
            warn!("{e:#}");
        }
    }
}
