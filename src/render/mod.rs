use crate::model::{SpreadResult, TickerAnalysis};
use anyhow::Result;
use comfy_table::{presets::UTF8_BORDERS_ONLY, Cell, Table};
use csv::Writer;
use rust_decimal::Decimal;
use std::fs::File;
use std::path::Path;
use tracing::info;

pub fn print_analysis(analysis: &TickerAnalysis) {
    println!("{}", analysis_table(analysis));
}

pub fn analysis_table(analysis: &TickerAnalysis) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec![
        "Ticker",
        "Spot",
        "Strategy",
        "Expiry",
        "DTE",
        "Strikes",
        "Width",
        "Cost",
        "Max Profit",
        "ROI %",
        "Breakeven",
        "Session / Reason",
    ]);

    let spot = analysis
        .current_price
        .map(format_decimal)
        .unwrap_or_else(|| "-".to_string());
    for (strategy, result) in &analysis.results {
        let row = match result {
            SpreadResult::Found {
                candidate,
                session_id,
                ..
            } => vec![
                Cell::new(&analysis.ticker),
                Cell::new(&spot),
                Cell::new(strategy),
                Cell::new(candidate.long.expiration_date.format("%Y-%m-%d").to_string()),
                Cell::new(candidate.dte.to_string()),
                Cell::new(format!(
                    "{}/{}",
                    candidate.long.strike.normalize(),
                    candidate.short.strike.normalize()
                )),
                Cell::new(candidate.width.normalize().to_string()),
                Cell::new(format_decimal(candidate.cost)),
                Cell::new(format_decimal(candidate.max_profit)),
                Cell::new(format!("{:.2}", candidate.roi_percent)),
                Cell::new(format_decimal(candidate.breakeven)),
                Cell::new(session_id.as_deref().unwrap_or("-")),
            ],
            SpreadResult::NotFound { reason } => {
                let mut cells = vec![
                    Cell::new(&analysis.ticker),
                    Cell::new(&spot),
                    Cell::new(strategy),
                ];
                cells.extend((0..8).map(|_| Cell::new("-")));
                cells.push(Cell::new(reason));
                cells
            }
        };
        table.add_row(row);
    }
    table
}

pub fn to_json(analyses: &[TickerAnalysis]) -> Result<String> {
    Ok(serde_json::to_string_pretty(analyses)?)
}

pub fn export_csv<P: AsRef<Path>>(analyses: &[TickerAnalysis], path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = Writer::from_writer(File::create(path)?);
    writer.write_record([
        "ticker",
        "current_price",
        "strategy",
        "found",
        "long_symbol",
        "short_symbol",
        "expiration_date",
        "dte",
        "width",
        "cost",
        "max_profit",
        "roi_percent",
        "breakeven",
        "session_id",
        "reason",
    ])?;
    let mut rows = 0usize;
    for analysis in analyses {
        let price = analysis
            .current_price
            .map(|p| p.normalize().to_string())
            .unwrap_or_default();
        for (strategy, result) in &analysis.results {
            let record = match result {
                SpreadResult::Found {
                    candidate,
                    session_id,
                    ..
                } => vec![
                    analysis.ticker.clone(),
                    price.clone(),
                    strategy.to_string(),
                    "true".to_string(),
                    candidate.long.ticker_symbol.clone(),
                    candidate.short.ticker_symbol.clone(),
                    candidate.long.expiration_date.to_string(),
                    candidate.dte.to_string(),
                    candidate.width.normalize().to_string(),
                    candidate.cost.normalize().to_string(),
                    candidate.max_profit.normalize().to_string(),
                    candidate.roi_percent.round_dp(4).normalize().to_string(),
                    candidate.breakeven.normalize().to_string(),
                    session_id.clone().unwrap_or_default(),
                    String::new(),
                ],
                SpreadResult::NotFound { reason } => {
                    let mut record = vec![
                        analysis.ticker.clone(),
                        price.clone(),
                        strategy.to_string(),
                        "false".to_string(),
                    ];
                    record.extend((0..10).map(|_| String::new()));
                    record.push(reason.clone());
                    record
                }
            };
            writer.write_record(record)?;
            rows += 1;
        }
    }
    writer.flush()?;
    info!(target: "export.csv", path = %path.display(), rows, "wrote spread results to disk");
    Ok(())
}

fn format_decimal(value: Decimal) -> String {
    if value.abs() < Decimal::new(1, 2) {
        format!("{:.4}", value)
    } else {
        format!("{:.2}", value)
    }
}
