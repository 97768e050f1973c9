//! Data models for holdings, price snapshots, alerts, and connectivity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A recorded position in one asset: quantity held and average unit cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    /// Ticker symbol (e.g., "btc", "eth")
    pub symbol: String,
    /// Average cost basis per unit
    pub cost_basis: f64,
    /// Number of units held
    pub quantity: f64,
}

impl Holding {
    /// Total amount paid for the position.
    pub fn total_cost(&self) -> f64 {
        self.quantity * self.cost_basis
    }

    /// Current value given a unit price.
    pub fn current_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    /// Profit/loss given a unit price.
    pub fn profit_loss(&self, price: f64) -> f64 {
        self.current_value(price) - self.total_cost()
    }

    /// Profit/loss percentage given a unit price.
    pub fn profit_loss_percent(&self, price: f64) -> f64 {
        if self.total_cost() == 0.0 {
            0.0
        } else {
            (self.profit_loss(price) / self.total_cost()) * 100.0
        }
    }
}

/// Holdings keyed by normalized ticker symbol, unique per user.
pub type Holdings = HashMap<String, Holding>;

/// Normalize a ticker for use as a holdings key. Keys are case-insensitive;
/// lowercase matches the symbol casing of the provider catalog.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_lowercase()
}

/// One asset's most recent market data in the target fiat currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    /// Current unit price in `currency`
    pub price: f64,
    /// Trading volume over the last 24 hours
    pub volume_24h: f64,
    /// Price change over the last 24 hours, in percent
    pub change_24h: f64,
    /// Fiat currency the price is quoted in (ISO 4217)
    pub currency: String,
    /// When this tick was observed
    pub observed_at: DateTime<Utc>,
}

/// The most recently fetched prices for all tracked assets.
///
/// Replaced wholesale on every successful fetch cycle. A symbol the provider
/// did not price has no entry here; absence means "unknown price", never an
/// implicit zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Ticks keyed by normalized ticker symbol
    pub ticks: HashMap<String, PriceTick>,
    /// When the fetch cycle that produced this snapshot completed
    pub fetched_at: Option<DateTime<Utc>>,
}

impl PriceSnapshot {
    /// Unit price for a symbol, if the latest cycle priced it.
    pub fn price_of(&self, symbol: &str) -> Option<f64> {
        self.ticks.get(symbol).map(|t| t.price)
    }

    /// True once at least one fetch cycle has completed.
    pub fn is_fetched(&self) -> bool {
        self.fetched_at.is_some()
    }
}

/// Direction of a price alert threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Above,
    Below,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::Above => write!(f, "above"),
            AlertKind::Below => write!(f, "below"),
        }
    }
}

/// Alert lifecycle state.
///
/// `Dismissed` and `Inactive` are terminal with respect to evaluation; an
/// alert in either state is never auto-re-triggered without an explicit
/// toggle back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Triggered,
    Dismissed,
    Inactive,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Active => write!(f, "active"),
            AlertStatus::Triggered => write!(f, "triggered"),
            AlertStatus::Dismissed => write!(f, "dismissed"),
            AlertStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// A user-defined price threshold watch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Opaque generated id
    pub id: String,
    /// Normalized ticker symbol this alert watches
    pub coin: String,
    /// Threshold direction
    #[serde(rename = "type")]
    pub kind: AlertKind,
    /// Threshold price in the display currency
    pub target_price: f64,
    /// Lifecycle state
    pub status: AlertStatus,
    /// When the alert was created
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Whether this alert participates in trigger evaluation.
    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }
}

/// A fired alert augmented with the price that crossed it, ready for the
/// notification sink.
#[derive(Debug, Clone, Serialize)]
pub struct TriggeredAlert {
    pub alert: Alert,
    /// Price at the moment of the trigger, in the display currency
    pub current_price: f64,
    /// Display currency (ISO 4217)
    pub currency: String,
}

/// Health of the refresh loop.
///
/// Single instance, owned and mutated only by the scheduler; everyone else
/// receives clones.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityState {
    /// False after a failed fetch cycle, true again after the next success
    pub is_connected: bool,
    /// When the last successful cycle completed
    pub last_update_at: DateTime<Utc>,
    /// When the next cycle is due
    pub next_update_at: DateTime<Utc>,
    /// Current polling interval; always within the policy bounds
    pub update_interval_ms: u64,
    /// Consecutive failed cycles; resets to 0 on any success
    pub retry_count: u32,
    /// Threshold at which persistent failure is reported
    pub max_retries: u32,
}

/// User preferences persisted alongside holdings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    /// Display currency (ISO 4217)
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            currency: default_currency(),
        }
    }
}

fn default_currency() -> String {
    "USD".to_string()
}
