//! Configuration file handling with TOML support.

use crate::alerts::AlertDraft;
use crate::models::{AlertKind, Holding, Holdings, normalize_symbol};
use crate::scheduler::RefreshPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Refresh loop timing policy
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Seed holdings, used when the store has none yet
    #[serde(default)]
    pub holdings: Vec<HoldingConfig>,

    /// Price alerts added to the alert book at startup
    #[serde(default)]
    pub alerts: Vec<AlertConfig>,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Display currency (ISO 4217)
    #[serde(default = "default_currency")]
    pub currency: String,

    /// API timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Ring the terminal bell when an alert triggers
    #[serde(default)]
    pub audio_alerts: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            timeout: default_timeout(),
            audio_alerts: false,
        }
    }
}

fn default_currency() -> String {
    "USD".to_string()
}
fn default_timeout() -> u64 {
    10
}

/// Refresh loop timing knobs; see [`RefreshPolicy`] for semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_post_fetch_alert_delay_ms")]
    pub post_fetch_alert_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retries: default_max_retries(),
            post_fetch_alert_delay_ms: default_post_fetch_alert_delay_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    60_000
}
fn default_min_interval_ms() -> u64 {
    30_000
}
fn default_max_interval_ms() -> u64 {
    300_000
}
fn default_backoff_multiplier() -> f64 {
    1.5
}
fn default_max_retries() -> u32 {
    3
}
fn default_post_fetch_alert_delay_ms() -> u64 {
    1_000
}

impl From<&RefreshConfig> for RefreshPolicy {
    fn from(config: &RefreshConfig) -> Self {
        RefreshPolicy {
            poll_interval_ms: config.poll_interval_ms,
            min_interval_ms: config.min_interval_ms,
            max_interval_ms: config.max_interval_ms,
            backoff_multiplier: config.backoff_multiplier,
            max_retries: config.max_retries,
            post_fetch_alert_delay_ms: config.post_fetch_alert_delay_ms,
        }
    }
}

/// Single holding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingConfig {
    /// Ticker symbol
    pub symbol: String,
    /// Number of units
    pub quantity: f64,
    /// Cost basis per unit
    pub cost_basis: f64,
}

impl From<HoldingConfig> for Holding {
    fn from(config: HoldingConfig) -> Self {
        Holding {
            symbol: normalize_symbol(&config.symbol),
            quantity: config.quantity,
            cost_basis: config.cost_basis,
        }
    }
}

/// Single price alert configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Ticker symbol the alert watches
    pub coin: String,
    /// Threshold direction ("above" or "below")
    pub kind: AlertKind,
    /// Threshold price in the display currency
    pub target_price: f64,
}

impl From<&AlertConfig> for AlertDraft {
    fn from(config: &AlertConfig) -> Self {
        AlertDraft {
            coin: config.coin.clone(),
            kind: config.kind,
            target_price: config.target_price,
        }
    }
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load configuration from default location or create default.
    pub fn load_or_default() -> Self {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                match Self::load(&path) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("Warning: Failed to load config: {}", e);
                    }
                }
            }
        }
        Config::default()
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("coinwatch").join("config.toml"))
    }

    /// Save configuration to file.
    pub fn save(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Seed holdings as a normalized holdings map.
    pub fn get_holdings(&self) -> Holdings {
        self.holdings
            .iter()
            .cloned()
            .map(Holding::from)
            .map(|h| (h.symbol.clone(), h))
            .collect()
    }

    /// Configured alert seeds as drafts for the alert book.
    pub fn get_alerts(&self) -> Vec<AlertDraft> {
        self.alerts.iter().map(AlertDraft::from).collect()
    }
}

/// Generate a sample configuration file content.
pub fn sample_config() -> &'static str {
    r##"# Coinwatch Configuration File
# A crypto portfolio tracker with live price polling and threshold alerts

[general]
# Display currency (ISO 4217)
currency = "USD"
# API timeout in seconds
timeout = 10
# Ring the terminal bell when an alert triggers
audio_alerts = false

[refresh]
# Default polling cadence in milliseconds
poll_interval_ms = 60000
# Bounds the cadence may never leave
min_interval_ms = 30000
max_interval_ms = 300000
# Interval growth per failed fetch cycle
backoff_multiplier = 1.5
# Consecutive failures before persistent trouble is reported
max_retries = 3
# Delay between a published snapshot and the alert pass
post_fetch_alert_delay_ms = 1000

# Portfolio holdings (seed; the store takes over once it has data)
[[holdings]]
symbol = "btc"
quantity = 0.5
cost_basis = 30000.00

[[holdings]]
symbol = "eth"
quantity = 4
cost_basis = 2200.00

# Price alerts, armed at startup unless an identical alert already exists
[[alerts]]
coin = "btc"
kind = "above"
target_price = 80000.00

[[alerts]]
coin = "eth"
kind = "below"
target_price = 1500.00
"##
}
