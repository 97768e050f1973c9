//! Price alert evaluation and lifecycle management.
//!
//! `evaluate` is pure: it maps an alert list and a snapshot to the updated
//! list plus the newly triggered alerts. The [`AlertBook`] wraps it with the
//! side effects the engine owes its callers: persist the updated list and
//! forward each trigger to the notification sink exactly once.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::models::{Alert, AlertKind, AlertStatus, PriceSnapshot, TriggeredAlert, normalize_symbol};
use crate::notify::NotificationSink;
use crate::scheduler::{SchedulerHandle, SnapshotHandler};
use crate::store::PersistenceStore;

/// Result of evaluating the alert set against one snapshot.
#[derive(Debug)]
pub struct EvaluationOutcome {
    /// The authoritative alert list with matched alerts moved to `Triggered`.
    pub alerts: Vec<Alert>,
    /// Newly triggered alerts, augmented with the price that crossed them.
    pub triggered: Vec<TriggeredAlert>,
}

/// Check every active alert against the snapshot.
///
/// Only `Active` alerts are considered; a coin with no snapshot entry is
/// skipped. The threshold is inclusive in both directions: a price exactly
/// equal to the target triggers. Returns a new list, never mutating input.
pub fn evaluate(alerts: &[Alert], snapshot: &PriceSnapshot, exchange_rate: f64) -> EvaluationOutcome {
    let mut triggered = Vec::new();
    let updated = alerts
        .iter()
        .map(|alert| {
            if alert.status != AlertStatus::Active {
                return alert.clone();
            }
            let Some(tick) = snapshot.ticks.get(&alert.coin) else {
                return alert.clone();
            };

            let current_price = tick.price * exchange_rate;
            let crossed = match alert.kind {
                AlertKind::Above => current_price >= alert.target_price,
                AlertKind::Below => current_price <= alert.target_price,
            };
            if !crossed {
                return alert.clone();
            }

            let mut fired = alert.clone();
            fired.status = AlertStatus::Triggered;
            triggered.push(TriggeredAlert {
                alert: fired.clone(),
                current_price,
                currency: tick.currency.clone(),
            });
            fired
        })
        .collect();

    EvaluationOutcome {
        alerts: updated,
        triggered,
    }
}

/// Opaque alert id: millisecond timestamp plus a random alphanumeric tail.
pub fn generate_alert_id() -> String {
    let tail: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("{}{}", Utc::now().timestamp_millis(), tail.to_lowercase())
}

/// User input for a new alert, before an id and status are assigned.
#[derive(Debug, Clone)]
pub struct AlertDraft {
    pub coin: String,
    pub kind: AlertKind,
    pub target_price: f64,
}

/// Validate a draft against the current price, when one is known.
///
/// An "above" target at or below 99% of the current price (or a "below"
/// target at or above 101%) would fire immediately or never make sense,
/// so it is rejected up front.
pub fn validate_alert(draft: &AlertDraft, current_price: Option<f64>) -> Result<(), Error> {
    if normalize_symbol(&draft.coin).is_empty() {
        return Err(Error::Validation("coin symbol is required".to_string()));
    }
    if !(draft.target_price > 0.0) {
        return Err(Error::Validation(
            "target price must be greater than 0".to_string(),
        ));
    }
    if let Some(price) = current_price {
        match draft.kind {
            AlertKind::Above if draft.target_price <= price * 0.99 => {
                return Err(Error::Validation(
                    "an above alert should be set higher than the current price".to_string(),
                ));
            }
            AlertKind::Below if draft.target_price >= price * 1.01 => {
                return Err(Error::Validation(
                    "a below alert should be set lower than the current price".to_string(),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Human-readable trigger message for notifications.
pub fn format_alert_message(triggered: &TriggeredAlert) -> String {
    let alert = &triggered.alert;
    format!(
        "{} is now {} your alert price of {:.2} {}. Current price: {:.2} {}",
        alert.coin.to_uppercase(),
        alert.kind,
        alert.target_price,
        triggered.currency,
        triggered.current_price,
        triggered.currency,
    )
}

/// Counts over the alert list, for status lines and summaries.
#[derive(Debug, Default, Clone)]
pub struct AlertStats {
    pub total: usize,
    pub active: usize,
    pub triggered: usize,
    pub dismissed: usize,
    pub inactive: usize,
    pub above: usize,
    pub below: usize,
    pub by_coin: HashMap<String, usize>,
}

pub fn alert_stats(alerts: &[Alert]) -> AlertStats {
    let mut stats = AlertStats {
        total: alerts.len(),
        ..AlertStats::default()
    };
    for alert in alerts {
        match alert.status {
            AlertStatus::Active => stats.active += 1,
            AlertStatus::Triggered => stats.triggered += 1,
            AlertStatus::Dismissed => stats.dismissed += 1,
            AlertStatus::Inactive => stats.inactive += 1,
        }
        match alert.kind {
            AlertKind::Above => stats.above += 1,
            AlertKind::Below => stats.below += 1,
        }
        *stats.by_coin.entry(alert.coin.clone()).or_insert(0) += 1;
    }
    stats
}

/// Owns the alert list and performs the persistence and notification side
/// effects around the pure `evaluate` step.
///
/// A triggered alert is never reported twice: the status transition to
/// `Triggered` happens in the same step that notifies, and re-arming needs
/// an explicit toggle back to `Active`.
pub struct AlertBook {
    alerts: Mutex<Vec<Alert>>,
    store: Arc<dyn PersistenceStore>,
    sink: Arc<dyn NotificationSink>,
    scheduler: StdMutex<Option<SchedulerHandle>>,
    exchange_rate: StdMutex<f64>,
    last_alert_load: StdMutex<Option<usize>>,
}

impl AlertBook {
    pub fn new(store: Arc<dyn PersistenceStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            store,
            sink,
            scheduler: StdMutex::new(None),
            exchange_rate: StdMutex::new(1.0),
            last_alert_load: StdMutex::new(None),
        }
    }

    /// Load the persisted alert list. A load failure degrades to an empty
    /// list rather than propagating.
    pub async fn load(&self) {
        match self.store.load_alerts().await {
            Ok(alerts) => {
                debug!(count = alerts.len(), "alerts loaded");
                *self.alerts.lock().await = alerts;
            }
            Err(err) => {
                warn!(error = %err, "failed to load alerts, starting empty");
            }
        }
    }

    /// Wire up the scheduler so cadence follows the active-alert count.
    pub fn attach_scheduler(&self, handle: SchedulerHandle) {
        *self.scheduler.lock().unwrap() = Some(handle);
    }

    /// Conversion factor from the provider's quote currency to the display
    /// currency (1.0 when they match).
    pub fn set_exchange_rate(&self, rate: f64) {
        *self.exchange_rate.lock().unwrap() = rate;
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }

    pub async fn active_count(&self) -> usize {
        self.alerts.lock().await.iter().filter(|a| a.is_active()).count()
    }

    /// Add configured alerts missing from the book. A draft whose coin,
    /// direction, and target already exist (whatever the status) is skipped,
    /// so seeds neither duplicate across runs nor re-arm a dismissed alert.
    /// Returns the number of alerts added.
    pub async fn seed(&self, drafts: &[AlertDraft]) -> usize {
        let mut added = 0;
        for draft in drafts {
            let coin = normalize_symbol(&draft.coin);
            let exists = self.alerts.lock().await.iter().any(|a| {
                a.coin == coin && a.kind == draft.kind && a.target_price == draft.target_price
            });
            if exists {
                continue;
            }
            match self.add(draft.clone(), None).await {
                Ok(alert) => {
                    debug!(coin = %alert.coin, kind = %alert.kind, target = alert.target_price,
                        "alert seeded from config");
                    added += 1;
                }
                Err(err) => {
                    warn!(error = %err, coin = %draft.coin, "skipping invalid alert seed");
                }
            }
        }
        added
    }

    /// Create a new active alert. Validation errors surface to the caller.
    pub async fn add(&self, draft: AlertDraft, current_price: Option<f64>) -> Result<Alert, Error> {
        validate_alert(&draft, current_price)?;
        let alert = Alert {
            id: generate_alert_id(),
            coin: normalize_symbol(&draft.coin),
            kind: draft.kind,
            target_price: draft.target_price,
            status: AlertStatus::Active,
            created_at: Utc::now(),
        };

        let mut alerts = self.alerts.lock().await;
        alerts.push(alert.clone());
        let updated = alerts.clone();
        drop(alerts);

        self.persist(&updated).await;
        self.cadence_changed(&updated);
        Ok(alert)
    }

    /// Remove an alert entirely, whatever its status. Returns false when
    /// the id is unknown.
    pub async fn delete(&self, id: &str) -> bool {
        let mut alerts = self.alerts.lock().await;
        let before = alerts.len();
        alerts.retain(|a| a.id != id);
        let removed = alerts.len() != before;
        let updated = alerts.clone();
        drop(alerts);

        if removed {
            self.persist(&updated).await;
            self.cadence_changed(&updated);
        }
        removed
    }

    /// Dismiss a triggered alert. Dismissed alerts are excluded from future
    /// evaluation until explicitly re-armed.
    pub async fn dismiss(&self, id: &str) -> bool {
        self.transition(id, |alert| {
            (alert.status == AlertStatus::Triggered).then_some(AlertStatus::Dismissed)
        })
        .await
        .is_some()
    }

    /// Flip an alert's armed state. An active alert goes inactive; anything
    /// else (inactive, triggered, dismissed) re-arms to active, which is the
    /// only way a fired alert can trigger again.
    pub async fn toggle(&self, id: &str) -> Option<AlertStatus> {
        self.transition(id, |alert| match alert.status {
            AlertStatus::Active => Some(AlertStatus::Inactive),
            _ => Some(AlertStatus::Active),
        })
        .await
    }

    async fn transition(
        &self,
        id: &str,
        next: impl Fn(&Alert) -> Option<AlertStatus>,
    ) -> Option<AlertStatus> {
        let mut alerts = self.alerts.lock().await;
        let new_status = alerts.iter_mut().find(|a| a.id == id).and_then(|alert| {
            let status = next(alert)?;
            alert.status = status;
            Some(status)
        });
        let updated = alerts.clone();
        drop(alerts);

        if new_status.is_some() {
            self.persist(&updated).await;
            self.cadence_changed(&updated);
        }
        new_status
    }

    /// The alert pass run after each published snapshot: evaluate, persist
    /// the transitions, and notify each newly triggered alert exactly once.
    pub async fn evaluate_snapshot(&self, snapshot: &PriceSnapshot) {
        let rate = *self.exchange_rate.lock().unwrap();

        let mut alerts = self.alerts.lock().await;
        if alerts.is_empty() || snapshot.ticks.is_empty() {
            return;
        }
        let outcome = evaluate(&alerts, snapshot, rate);
        if outcome.triggered.is_empty() {
            return;
        }
        *alerts = outcome.alerts.clone();
        drop(alerts);

        info!(count = outcome.triggered.len(), "price alerts triggered");
        self.persist(&outcome.alerts).await;
        for triggered in &outcome.triggered {
            self.sink.notify(triggered).await;
        }
        self.cadence_changed(&outcome.alerts);
    }

    /// Save failures are reported but never roll back in-memory state.
    async fn persist(&self, alerts: &[Alert]) {
        if let Err(err) = self.store.save_alerts(alerts).await {
            warn!(error = %err, "failed to persist alerts");
        }
    }

    /// Recompute cadence only when the active count actually moved.
    /// Mutations that leave it alone (dismissing a triggered alert, deleting
    /// a dismissed one) must not reset an interval grown by backoff.
    fn cadence_changed(&self, alerts: &[Alert]) {
        let active = alerts.iter().filter(|a| a.is_active()).count();
        {
            let mut last = self.last_alert_load.lock().unwrap();
            if *last == Some(active) {
                return;
            }
            *last = Some(active);
        }
        if let Some(handle) = self.scheduler.lock().unwrap().as_ref() {
            handle.apply_alert_load(active);
        }
    }
}

#[async_trait]
impl SnapshotHandler for AlertBook {
    async fn on_snapshot(&self, snapshot: &PriceSnapshot) {
        self.evaluate_snapshot(snapshot).await;
    }
}
