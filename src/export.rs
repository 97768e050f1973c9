//! Portfolio data export for integration with other tools.
//!
//! Provides CSV, JSON, and plain text renderings of the priced portfolio.

use crate::models::{Holdings, PriceSnapshot};
use crate::portfolio::{PortfolioTotals, total_value};
use serde::Serialize;

/// Export format type
#[derive(Debug, Clone, Copy)]
pub enum ExportFormat {
    Text,
    Csv,
    Json,
}

/// One holding joined with its latest price, when the snapshot has one.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioRow {
    pub symbol: String,
    pub quantity: f64,
    pub cost_basis: f64,
    pub price: Option<f64>,
    pub value: Option<f64>,
    pub profit_loss: Option<f64>,
    pub change_24h: Option<f64>,
}

/// Join holdings with the snapshot, sorted by symbol for stable output.
pub fn portfolio_rows(
    holdings: &Holdings,
    snapshot: &PriceSnapshot,
    exchange_rate: f64,
) -> Vec<PortfolioRow> {
    let mut rows: Vec<PortfolioRow> = holdings
        .values()
        .map(|holding| {
            let tick = snapshot.ticks.get(&holding.symbol);
            let price = tick.map(|t| t.price * exchange_rate);
            PortfolioRow {
                symbol: holding.symbol.clone(),
                quantity: holding.quantity,
                cost_basis: holding.cost_basis,
                price,
                value: price.map(|p| holding.current_value(p)),
                profit_loss: price.map(|p| holding.profit_loss(p)),
                change_24h: tick.map(|t| t.change_24h),
            }
        })
        .collect();
    rows.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    rows
}

/// Export the portfolio in the specified format.
pub fn export_portfolio(
    holdings: &Holdings,
    snapshot: &PriceSnapshot,
    exchange_rate: f64,
    format: ExportFormat,
) -> String {
    let rows = portfolio_rows(holdings, snapshot, exchange_rate);
    let totals = total_value(holdings, snapshot, exchange_rate);
    match format {
        ExportFormat::Text => export_text(&rows, &totals),
        ExportFormat::Csv => export_csv(&rows),
        ExportFormat::Json => export_json(&rows, &totals),
    }
}

/// Plain text (screen reader friendly).
fn export_text(rows: &[PortfolioRow], totals: &PortfolioTotals) -> String {
    let mut output = String::new();

    output.push_str("COINWATCH PORTFOLIO EXPORT\n");
    output.push_str("==========================\n\n");

    for row in rows {
        output.push_str(&format!("Symbol: {}\n", row.symbol.to_uppercase()));
        output.push_str(&format!("Quantity: {}\n", row.quantity));
        output.push_str(&format!("Cost Basis: {:.2}\n", row.cost_basis));
        match row.price {
            Some(price) => {
                output.push_str(&format!("Price: {:.2}\n", price));
                output.push_str(&format!("Value: {:.2}\n", row.value.unwrap_or(0.0)));
                output.push_str(&format!("P/L: {:+.2}\n", row.profit_loss.unwrap_or(0.0)));
            }
            None => output.push_str("Price: unavailable\n"),
        }
        output.push('\n');
    }

    output.push_str(&format!("Total Value: {:.2}\n", totals.total_value));
    output.push_str(&format!("Total Basis: {:.2}\n", totals.total_basis));
    output.push_str(&format!("Total P/L: {:+.2}\n", totals.profit_loss()));

    output
}

/// Comma-separated values. Unpriced holdings render empty cells, not zeros.
fn export_csv(rows: &[PortfolioRow]) -> String {
    let mut output = String::new();
    output.push_str("Symbol,Quantity,CostBasis,Price,Value,ProfitLoss,Change24h\n");

    let cell = |v: Option<f64>| v.map(|v| format!("{v:.2}")).unwrap_or_default();
    for row in rows {
        output.push_str(&format!(
            "\"{}\",{},{:.2},{},{},{},{}\n",
            row.symbol,
            row.quantity,
            row.cost_basis,
            cell(row.price),
            cell(row.value),
            cell(row.profit_loss),
            cell(row.change_24h),
        ));
    }

    output
}

fn export_json(rows: &[PortfolioRow], totals: &PortfolioTotals) -> String {
    #[derive(Serialize)]
    struct Export<'a> {
        holdings: &'a [PortfolioRow],
        total_value: f64,
        total_basis: f64,
        profit_loss: f64,
    }

    let export = Export {
        holdings: rows,
        total_value: totals.total_value,
        total_basis: totals.total_basis,
        profit_loss: totals.profit_loss(),
    };
    serde_json::to_string_pretty(&export).unwrap_or_else(|_| "{}".to_string())
}
