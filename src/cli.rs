//! Command-line interface.

use crate::export::ExportFormat;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// A crypto portfolio tracker that polls live market prices, values your
/// holdings, and fires threshold alerts.
///
/// Coinwatch keeps a local portfolio of coin positions, refreshes prices on
/// an adaptive cadence (backing off when the market API misbehaves), and
/// prints or beeps when a price crosses one of your alert targets.
#[derive(Parser, Debug, Clone)]
#[command(name = "coinwatch")]
#[command(version)]
#[command(about = "Track a crypto portfolio with live prices and alerts", long_about = None)]
pub struct Args {
    /// Refresh delay in seconds (overrides the configured poll interval)
    #[arg(short = 'd', long, env = "COINWATCH_DELAY")]
    pub delay: Option<f64>,

    /// Number of refresh cycles before exiting (like top -n)
    ///
    /// 0 means run until interrupted
    #[arg(short = 'n', long, default_value = "0")]
    pub iterations: u64,

    /// Configuration file path
    #[arg(short = 'c', long, env = "COINWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Currency for display (ISO 4217 code, overrides config)
    #[arg(long)]
    pub currency: Option<String>,

    /// Use the signed-in account store instead of the local one
    #[arg(long)]
    pub signed_in: bool,

    /// Enable audible alerts when price targets are crossed
    #[arg(long)]
    pub audio_alerts: bool,

    /// Print the portfolio in the given format after the final cycle
    #[arg(long, value_enum)]
    pub export: Option<ExportArg>,

    /// API timeout in seconds
    #[arg(long, default_value = "10")]
    pub timeout: u64,

    /// Verbose output - show more details
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Export format for data output.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ExportArg {
    /// Plain text format
    Text,
    /// Comma-separated values (CSV)
    Csv,
    /// JavaScript Object Notation (JSON)
    Json,
}

impl From<ExportArg> for ExportFormat {
    fn from(arg: ExportArg) -> Self {
        match arg {
            ExportArg::Text => ExportFormat::Text,
            ExportArg::Csv => ExportFormat::Csv,
            ExportArg::Json => ExportFormat::Json,
        }
    }
}

impl Args {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Args::parse()
    }
}
