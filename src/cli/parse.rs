use super::ui;
use crate::core::error::EstimateError;
use crate::core::holdings::{Holding, parse_holdings_lines};
use anyhow::{Context, Result};
use comfy_table::{Cell, Color, Table};
use std::fs;

/// Parses a holdings file and shows what each line turned into.
pub fn run(file: &str) -> Result<()> {
    let text =
        fs::read_to_string(file).with_context(|| format!("Failed to read holdings file: {file}"))?;
    let parsed = parse_holdings_lines(&text);

    println!("{}", parsed_table(&parsed));
    let accepted: Vec<&Holding> = parsed.iter().filter_map(|r| r.as_ref().ok()).collect();
    let total: f64 = accepted.iter().map(|h| h.weight).sum();
    println!(
        "{} {} of {} lines, disclosed weight {:.2}%",
        ui::style_text("Accepted", ui::StyleType::Label),
        accepted.len(),
        parsed.len(),
        total * 100.0
    );
    if total > 1.0 {
        println!(
            "{}",
            ui::style_text("Weights add up to more than 100%", ui::StyleType::Warning)
        );
    }
    Ok(())
}

pub fn parsed_table(parsed: &[Result<Holding, EstimateError>]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("#"),
        ui::header_cell("Symbol"),
        ui::header_cell("Weight"),
        ui::header_cell("Status"),
    ]);
    for (i, line) in parsed.iter().enumerate() {
        let row = match line {
            Ok(holding) => vec![
                Cell::new(i + 1),
                Cell::new(&holding.symbol),
                Cell::new(format!("{:.2}%", holding.weight * 100.0)),
                Cell::new("ok").fg(Color::DarkGrey),
            ],
            Err(e) => vec![
                Cell::new(i + 1),
                ui::na_cell(true),
                ui::na_cell(true),
                Cell::new(e.to_string()).fg(Color::Red),
            ],
        };
        table.add_row(row);
    }
    table
}
