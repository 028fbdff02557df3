use super::ui;
use crate::App;
use crate::core::estimator::ValuationSource;
use crate::core::intraday::IntradayPoint;
use crate::core::session::{exchange_now, trading_day};
use anyhow::Result;
use comfy_table::{Cell, Table};
use std::collections::BTreeMap;

pub async fn run(app: &App, code: &str) -> Result<()> {
    let today = trading_day(&exchange_now());
    let Some((day, points)) = app.recorder.read_latest(code, today).await else {
        println!("No intraday history for {code}.");
        return Ok(());
    };

    let title = format!("{code} on {day}");
    println!("\n{}", ui::style_text(&title, ui::StyleType::Title));
    if day != today {
        println!(
            "{}",
            ui::style_text("Nothing recorded today, showing the last recorded day", ui::StyleType::Subtle)
        );
    }
    println!("{}", curve_table(&points));
    Ok(())
}

/// Pivots points into one row per slot with a column per source.
pub fn curve_table(points: &[IntradayPoint]) -> Table {
    let sources = [ValuationSource::Official, ValuationSource::Holdings];
    let mut slots: BTreeMap<&str, BTreeMap<ValuationSource, f64>> = BTreeMap::new();
    for point in points {
        slots
            .entry(point.time.as_str())
            .or_default()
            .insert(point.source, point.value);
    }

    let mut table = ui::new_styled_table();
    let mut header = vec![ui::header_cell("Time")];
    header.extend(sources.iter().map(|s| ui::header_cell(&s.to_string())));
    table.set_header(header);

    for (time, values) in slots {
        let mut row = vec![Cell::new(time)];
        row.extend(sources.iter().map(|source| match values.get(source) {
            Some(value) => ui::change_cell(*value),
            None => ui::na_cell(false),
        }));
        table.add_row(row);
    }
    table
}
