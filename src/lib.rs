//! Coinwatch - a crypto portfolio tracker with live price polling, adaptive
//! refresh backoff, and threshold price alerts.
//!
//! The library splits into a pure core (portfolio valuation, alert
//! evaluation) and the async machinery around it (market-data provider,
//! refresh scheduler, persistence, notification sinks). The binary in
//! `main.rs` wires them together.

pub mod alerts;
pub mod api;
pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod models;
pub mod notify;
pub mod portfolio;
pub mod scheduler;
pub mod store;

pub use error::{Error, Result};
pub use models::{Alert, AlertKind, AlertStatus, Holding, Holdings, PriceSnapshot};
pub use scheduler::{RefreshPolicy, RefreshScheduler, SchedulerHandle};
