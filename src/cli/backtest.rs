use super::ui;
use crate::App;
use crate::core::backtest::{BacktestReport, BacktestStatus, Evaluator, FundUnderTest, Metrics};
use crate::core::estimator::ValuationSource;
use crate::core::session::{exchange_now, trading_day};
use crate::providers::JsonDataset;
use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Table};
use std::sync::Arc;
use tracing::info;

pub async fn run(app: &App, force: bool, dataset: Option<&str>) -> Result<()> {
    let codes = app.config.fund_codes();
    let today = trading_day(&exchange_now());

    if !force
        && let Some(report) = app.reports.get(today).await
        && report.covers(&codes)
    {
        println!(
            "{}",
            ui::style_text("Using today's cached report (--force to rerun)", ui::StyleType::Subtle)
        );
        print_report(&report);
        return Ok(());
    }

    let path = dataset
        .map(str::to_string)
        .or_else(|| app.config.backtest.dataset_path.clone())
        .context("No backtest dataset: set backtest.dataset_path or pass --dataset")?;
    let data = Arc::new(JsonDataset::load(&path)?);

    let funds: Vec<FundUnderTest> = app
        .config
        .funds
        .iter()
        .map(|f| FundUnderTest {
            code: f.code.clone(),
            name: f.name.clone(),
            benchmark_symbol: f.benchmark.clone(),
        })
        .collect();
    let handle = Evaluator::new(data, app.config.strategy)
        .with_window(app.config.backtest.window_days)
        .with_recorder(Arc::clone(&app.recorder))
        .with_cache(app.reports.clone())
        .spawn(funds, today);

    let pb = ui::new_progress_bar(codes.len() as u64, true);
    pb.set_message("Backtesting");
    let mut progress = handle.subscribe();
    loop {
        let snapshot = progress.borrow_and_update().clone();
        pb.set_position(snapshot.completed as u64);
        if snapshot.status.is_finished() {
            break;
        }
        tokio::select! {
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Cancelling backtest");
                handle.cancel();
            }
        }
    }
    pb.finish_and_clear();

    let finished = handle.wait().await;
    match (finished.status, finished.report) {
        (BacktestStatus::Complete, Some(report)) => {
            print_report(&report);
            Ok(())
        }
        (BacktestStatus::Failed(reason), _) => bail!("Backtest failed: {reason}"),
        (status, _) => bail!("Backtest ended in state {status:?}"),
    }
}

fn metric_cells(metrics: &Metrics) -> Vec<Cell> {
    vec![
        Cell::new(metrics.samples),
        Cell::new(format!("{:.3}", metrics.mae)),
        Cell::new(format!("{:.3}", metrics.rmse)),
        Cell::new(format!("{:.0}%", metrics.hit_rate_02 * 100.0)),
        Cell::new(format!("{:.0}%", metrics.hit_rate_05 * 100.0)),
        Cell::new(format!("{:.3}", metrics.max_err)),
        Cell::new(format!("{:+.3}", metrics.bias)),
    ]
}

pub fn report_table(report: &BacktestReport) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Code"),
        ui::header_cell("Name"),
        ui::header_cell("Days"),
        ui::header_cell("MAE"),
        ui::header_cell("RMSE"),
        ui::header_cell("Hit 0.2"),
        ui::header_cell("Hit 0.5"),
        ui::header_cell("Max"),
        ui::header_cell("Bias"),
        ui::header_cell(&format!("{} MAE", report.baseline)),
        ui::header_cell("Live official"),
        ui::header_cell("Live holdings"),
    ]);

    for result in &report.results {
        let mut row = vec![
            Cell::new(&result.fund_code),
            Cell::new(result.name.as_deref().unwrap_or("")),
        ];
        row.extend(metric_cells(&result.metrics));
        row.push(ui::format_optional_cell(result.baseline, |m| {
            format!("{:.3}", m.mae)
        }));
        for source in [ValuationSource::Official, ValuationSource::Holdings] {
            row.push(ui::format_optional_cell(result.recorded.get(&source), |m| {
                format!("{:.3} ({})", m.mae, m.samples)
            }));
        }
        table.add_row(row);
    }
    table
}

fn print_report(report: &BacktestReport) {
    let title = format!(
        "Backtest {} vs {} over {} days",
        report.strategy, report.baseline, report.window_days
    );
    println!("\n{}", ui::style_text(&title, ui::StyleType::Title));
    if report.results.is_empty() {
        println!("No fund had scorable days.");
        return;
    }
    println!("{}", report_table(report));
}
