use super::ui;
use crate::App;
use crate::core::estimator::FundEstimate;
use crate::core::refresh::FundOutcome;
use crate::core::session::exchange_now;
use anyhow::Result;
use comfy_table::{Cell, CellAlignment, Color, Table};

pub async fn run(app: &App) -> Result<()> {
    let codes = app.config.fund_codes();
    if codes.is_empty() {
        println!("No funds configured.");
        return Ok(());
    }

    let outcomes = app.refresher.refresh(&codes, exchange_now()).await?;
    println!(
        "\n{}",
        ui::style_text("Intraday Estimates", ui::StyleType::Title)
    );
    println!("{}", outcome_table(&outcomes));
    Ok(())
}

fn estimate_cells(estimate: &FundEstimate, code: &str) -> Vec<Cell> {
    vec![
        Cell::new(code),
        Cell::new(estimate.name.as_deref().unwrap_or("")),
        ui::format_optional_cell(estimate.gsz, |v| format!("{v:.4}")),
        ui::change_cell(estimate.gszzl),
        Cell::new(estimate.valuation_source.to_string()),
        ui::format_optional_cell(estimate.coverage, |v| format!("{:.0}%", v * 100.0)),
        Cell::new(estimate.holdings_date.as_deref().unwrap_or("-")),
        Cell::new(&estimate.gztime),
    ]
}

/// One row per fund. A failed fund shows its last good estimate, if any,
/// with the error in the status column.
pub fn outcome_table(outcomes: &[FundOutcome]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Code"),
        ui::header_cell("Name"),
        ui::header_cell("Est. NAV"),
        ui::header_cell("Change"),
        ui::header_cell("Source"),
        ui::header_cell("Coverage"),
        ui::header_cell("Holdings"),
        ui::header_cell("Time"),
        ui::header_cell("Status"),
    ]);

    for outcome in outcomes {
        let mut row = match &outcome.latest {
            Some(estimate) => estimate_cells(estimate, &outcome.code),
            None => {
                let mut cells = vec![Cell::new(&outcome.code), Cell::new("")];
                cells.extend((0..6).map(|_| ui::na_cell(outcome.error.is_some())));
                cells
            }
        };
        let status = match &outcome.error {
            Some(e) => Cell::new(e.to_string()).fg(Color::Red),
            None => Cell::new("ok").fg(Color::DarkGrey),
        };
        row.push(status.set_alignment(CellAlignment::Left));
        table.add_row(row);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EstimateError;
    use crate::core::estimator::ValuationSource;

    fn estimate(gszzl: f64) -> FundEstimate {
        FundEstimate {
            code: "161725".into(),
            name: Some("Liquor Index".into()),
            gsz: Some(1.0123),
            gszzl,
            gztime: "2024-01-03 10:30".into(),
            coverage: Some(0.9),
            cash_ratio: 0.05,
            holdings_date: Some("2023-12-31".into()),
            base_nav: Some(1.0),
            valuation_source: ValuationSource::Holdings,
            benchmark_symbol: None,
            strategy_version: None,
            quote_time: None,
        }
    }

    #[test]
    fn test_outcome_table_rows() {
        let outcomes = vec![
            FundOutcome {
                code: "161725".into(),
                latest: Some(estimate(1.23)),
                previous: None,
                error: None,
            },
            FundOutcome {
                code: "005827".into(),
                latest: None,
                previous: None,
                error: Some(EstimateError::HoldingsEmpty("005827".into())),
            },
        ];
        let rendered = outcome_table(&outcomes).to_string();
        assert!(rendered.contains("Liquor Index"));
        assert!(rendered.contains("+1.23%"));
        assert!(rendered.contains("90%"));
        assert!(rendered.contains("holdings empty"));
    }
}
