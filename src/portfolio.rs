//! Pure portfolio valuation: merge-on-add holdings and aggregate totals.

use crate::error::Error;
use crate::models::{Holding, Holdings, PriceSnapshot, normalize_symbol};

/// Aggregate portfolio value and cost basis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PortfolioTotals {
    /// Sum of price * quantity over holdings the snapshot priced
    pub total_value: f64,
    /// Sum of cost basis * quantity over ALL holdings
    pub total_basis: f64,
}

impl PortfolioTotals {
    pub fn profit_loss(&self) -> f64 {
        self.total_value - self.total_basis
    }
}

/// Record a purchase. An existing position merges via weighted-average cost
/// basis; a new symbol is inserted as-is. Returns the updated holdings map,
/// leaving the input untouched.
pub fn add_holding(
    holdings: &Holdings,
    symbol: &str,
    cost_basis: f64,
    quantity: f64,
) -> Result<Holdings, Error> {
    let key = normalize_symbol(symbol);
    if key.is_empty() {
        return Err(Error::Validation("ticker symbol is required".to_string()));
    }
    if !(quantity > 0.0) {
        return Err(Error::Validation(
            "quantity must be greater than 0".to_string(),
        ));
    }
    if !(cost_basis > 0.0) {
        return Err(Error::Validation(
            "cost basis must be greater than 0".to_string(),
        ));
    }

    let mut next = holdings.clone();
    match next.get_mut(&key) {
        Some(existing) => {
            let new_quantity = existing.quantity + quantity;
            if new_quantity == 0.0 {
                // Both quantities zero: refuse rather than divide by zero.
                return Err(Error::Validation(
                    "merged position would have zero quantity".to_string(),
                ));
            }
            existing.cost_basis =
                (cost_basis * quantity + existing.cost_basis * existing.quantity) / new_quantity;
            existing.quantity = new_quantity;
        }
        None => {
            next.insert(
                key.clone(),
                Holding {
                    symbol: key,
                    cost_basis,
                    quantity,
                },
            );
        }
    }
    Ok(next)
}

/// Aggregate value and basis of the portfolio against a snapshot.
///
/// Basis counts every holding; value counts only the holdings the snapshot
/// priced. A holding without a price contributes 0 to value but its full
/// basis: we know what we paid even when we cannot price it right now.
pub fn total_value(
    holdings: &Holdings,
    snapshot: &PriceSnapshot,
    exchange_rate: f64,
) -> PortfolioTotals {
    let mut totals = PortfolioTotals::default();
    for (symbol, holding) in holdings {
        totals.total_basis += holding.total_cost();
        if let Some(tick) = snapshot.ticks.get(symbol) {
            totals.total_value += holding.current_value(tick.price * exchange_rate);
        }
    }
    totals
}

/// Percentage share of total value per priced holding, largest first.
pub fn allocation(
    holdings: &Holdings,
    snapshot: &PriceSnapshot,
    exchange_rate: f64,
) -> Vec<(String, f64)> {
    let totals = total_value(holdings, snapshot, exchange_rate);
    if totals.total_value == 0.0 {
        return Vec::new();
    }

    let mut shares: Vec<(String, f64)> = holdings
        .iter()
        .filter_map(|(symbol, holding)| {
            let tick = snapshot.ticks.get(symbol)?;
            let value = holding.current_value(tick.price * exchange_rate);
            Some((symbol.clone(), value / totals.total_value * 100.0))
        })
        .collect();
    shares.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    shares
}
