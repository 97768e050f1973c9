//! The refresh scheduler: keeps the price snapshot fresh and adapts its own
//! cadence to failures and alert load.
//!
//! One driver task owns the polling loop. Out-of-band refreshes, interval
//! changes, and stop requests arrive on a command channel and are processed
//! between cycles, so no two fetch cycles are ever in flight at once and
//! snapshots are always published in completion order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::api::MarketDataProvider;
use crate::error::ProviderError;
use crate::models::{ConnectivityState, Holdings, PriceSnapshot, PriceTick};

/// Timing policy for the refresh loop.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    /// Default cadence between fetch cycles
    pub poll_interval_ms: u64,
    /// Lower bound for any interval
    pub min_interval_ms: u64,
    /// Upper bound; backoff growth caps here and never abandons polling
    pub max_interval_ms: u64,
    /// Multiplicative interval growth per failed cycle
    pub backoff_multiplier: f64,
    /// Consecutive-failure count at which persistent failure is reported
    pub max_retries: u32,
    /// Delay between publishing a snapshot and running the alert pass,
    /// so consumers settle before notification side effects fire
    pub post_fetch_alert_delay_ms: u64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
            min_interval_ms: 30_000,
            max_interval_ms: 300_000,
            backoff_multiplier: 1.5,
            max_retries: 3,
            post_fetch_alert_delay_ms: 1_000,
        }
    }
}

impl RefreshPolicy {
    /// Clamp an interval into the policy bounds.
    pub fn clamp(&self, interval_ms: u64) -> u64 {
        interval_ms.clamp(self.min_interval_ms, self.max_interval_ms)
    }

    /// Cadence for a given active-alert count: more alerts, tighter polling.
    pub fn interval_for_alert_load(&self, active_alerts: usize) -> u64 {
        if active_alerts > 10 {
            30_000
        } else if active_alerts > 5 {
            45_000
        } else {
            self.poll_interval_ms
        }
    }

    /// Grown interval after one failed cycle, capped at the maximum.
    fn backoff(&self, interval_ms: u64) -> u64 {
        let grown = (interval_ms as f64 * self.backoff_multiplier) as u64;
        grown.min(self.max_interval_ms)
    }
}

/// Injectable time source so backoff and cadence arithmetic is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock used outside of tests.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Receives each freshly published snapshot; called at most once per
/// completed fetch cycle, after the post-fetch delay.
#[async_trait]
pub trait SnapshotHandler: Send + Sync {
    async fn on_snapshot(&self, snapshot: &PriceSnapshot);
}

enum Command {
    Refresh(Option<Holdings>),
    SetInterval(u64),
    AlertLoad(usize),
    Stop,
}

/// Cloneable handle for poking a running scheduler from elsewhere.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    /// Run one fetch cycle out of band, optionally swapping in new holdings.
    /// The recurring timer's schedule is not disturbed.
    pub fn refresh_now(&self, holdings: Option<Holdings>) {
        let _ = self.tx.send(Command::Refresh(holdings));
    }

    /// Replace the recurring cadence: the previous timer is cancelled and a
    /// new one armed atomically on the driver task.
    pub fn set_interval_policy(&self, interval_ms: u64) {
        let _ = self.tx.send(Command::SetInterval(interval_ms));
    }

    /// Recompute cadence from the number of currently active alerts.
    pub fn apply_alert_load(&self, active_alerts: usize) {
        let _ = self.tx.send(Command::AlertLoad(active_alerts));
    }

    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }
}

/// Owns the polling loop, retry/backoff policy, and connectivity status.
pub struct RefreshScheduler {
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    currency: String,
    handler: Option<Arc<dyn SnapshotHandler>>,
    snapshot_tx: Arc<watch::Sender<PriceSnapshot>>,
    conn_tx: Arc<watch::Sender<ConnectivityState>>,
    eval_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    stopped: Arc<AtomicBool>,
    handle: Option<SchedulerHandle>,
    driver: Option<JoinHandle<()>>,
}

impl RefreshScheduler {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        policy: RefreshPolicy,
        currency: impl Into<String>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let now = clock.now();
        let initial_state = ConnectivityState {
            is_connected: true,
            last_update_at: now,
            next_update_at: now + chrono::Duration::milliseconds(policy.poll_interval_ms as i64),
            update_interval_ms: policy.poll_interval_ms,
            retry_count: 0,
            max_retries: policy.max_retries,
        };
        let (snapshot_tx, _) = watch::channel(PriceSnapshot::default());
        let (conn_tx, _) = watch::channel(initial_state);

        Self {
            provider,
            clock,
            policy,
            currency: currency.into(),
            handler: None,
            snapshot_tx: Arc::new(snapshot_tx),
            conn_tx: Arc::new(conn_tx),
            eval_task: Arc::new(Mutex::new(None)),
            stopped: Arc::new(AtomicBool::new(false)),
            handle: None,
            driver: None,
        }
    }

    /// Substitute the time source (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register the alert-evaluation pass run after each published snapshot.
    pub fn with_handler(mut self, handler: Arc<dyn SnapshotHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Latest published snapshot; updated only by completed fetch cycles.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<PriceSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Connectivity health as of the most recent cycle.
    pub fn connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.conn_tx.subscribe()
    }

    /// Handle for poking the scheduler from other components. `None` until
    /// `start` has been called.
    pub fn handle(&self) -> Option<SchedulerHandle> {
        self.handle.clone()
    }

    /// Begin periodic refresh: one immediate fetch cycle, then a recurring
    /// timer at the current interval. Safe to call again after `stop`.
    pub fn start(&mut self, holdings: Holdings, initial_interval_ms: u64) {
        self.stop();

        // Fresh flag per generation: a driver aborted mid-poll by the
        // previous stop still sees its own flag as stopped.
        self.stopped = Arc::new(AtomicBool::new(false));

        let (tx, rx) = mpsc::unbounded_channel();
        let interval_ms = self.policy.clamp(initial_interval_ms);
        let driver = Driver {
            provider: self.provider.clone(),
            clock: self.clock.clone(),
            policy: self.policy.clone(),
            currency: self.currency.clone(),
            handler: self.handler.clone(),
            snapshot_tx: self.snapshot_tx.clone(),
            conn_tx: self.conn_tx.clone(),
            eval_task: self.eval_task.clone(),
            stopped: self.stopped.clone(),
            holdings,
            interval_ms,
            state: self.conn_tx.borrow().clone(),
        };

        self.handle = Some(SchedulerHandle { tx });
        self.driver = Some(tokio::spawn(driver.run(rx)));
        debug!(interval_ms, "refresh scheduler started");
    }

    /// See [`SchedulerHandle::refresh_now`].
    pub fn refresh_now(&self, holdings: Option<Holdings>) {
        if let Some(handle) = &self.handle {
            handle.refresh_now(holdings);
        }
    }

    /// See [`SchedulerHandle::set_interval_policy`].
    pub fn set_interval_policy(&self, interval_ms: u64) {
        if let Some(handle) = &self.handle {
            handle.set_interval_policy(interval_ms);
        }
    }

    /// Cancel all pending timers and the deferred alert pass, and discard
    /// in-flight network results. Safe to call multiple times.
    ///
    /// Abort only lands at the next await point, so a driver in the
    /// synchronous stretch after a fetch resolves could otherwise finish
    /// publishing. The stopped flag is set first and re-checked before any
    /// publish or eval spawn, which closes that window.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        if let Some(eval) = self.eval_task.lock().unwrap().take() {
            eval.abort();
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Loop state owned by the driver task.
struct Driver {
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    currency: String,
    handler: Option<Arc<dyn SnapshotHandler>>,
    snapshot_tx: Arc<watch::Sender<PriceSnapshot>>,
    conn_tx: Arc<watch::Sender<ConnectivityState>>,
    eval_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    stopped: Arc<AtomicBool>,
    holdings: Holdings,
    interval_ms: u64,
    state: ConnectivityState,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        self.run_cycle().await;
        let mut next_tick = Instant::now() + Duration::from_millis(self.interval_ms);

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    None | Some(Command::Stop) => break,
                    Some(Command::Refresh(holdings)) => {
                        if let Some(holdings) = holdings {
                            self.holdings = holdings;
                        }
                        // Out-of-band cycle; the recurring deadline stands.
                        self.run_cycle().await;
                    }
                    Some(Command::SetInterval(interval_ms)) => {
                        self.rearm(interval_ms, &mut next_tick);
                    }
                    Some(Command::AlertLoad(active_alerts)) => {
                        let interval_ms = self.policy.interval_for_alert_load(active_alerts);
                        if interval_ms != self.interval_ms {
                            debug!(active_alerts, interval_ms, "cadence adapted to alert load");
                            self.rearm(interval_ms, &mut next_tick);
                        }
                    }
                },
                _ = tokio::time::sleep_until(next_tick) => {
                    self.run_cycle().await;
                    // Backoff growth from a failed cycle takes effect here.
                    next_tick = Instant::now() + Duration::from_millis(self.interval_ms);
                }
            }
        }

        if let Some(eval) = self.eval_task.lock().unwrap().take() {
            eval.abort();
        }
        debug!("refresh scheduler stopped");
    }

    fn rearm(&mut self, interval_ms: u64, next_tick: &mut Instant) {
        self.interval_ms = self.policy.clamp(interval_ms);
        *next_tick = Instant::now() + Duration::from_millis(self.interval_ms);
        self.state.update_interval_ms = self.interval_ms;
        self.state.next_update_at =
            self.clock.now() + chrono::Duration::milliseconds(self.interval_ms as i64);
        let _ = self.conn_tx.send(self.state.clone());
    }

    async fn run_cycle(&mut self) {
        match self.fetch_snapshot().await {
            Ok(snapshot) => self.on_success(snapshot),
            Err(err) => self.on_failure(err),
        }
    }

    /// One fetch cycle: resolve catalog ids for the user's symbols, then
    /// batch-fetch prices. Either network call failing aborts the cycle with
    /// no partial snapshot.
    async fn fetch_snapshot(&self) -> Result<PriceSnapshot, ProviderError> {
        let now = self.clock.now();
        let empty = PriceSnapshot {
            ticks: HashMap::new(),
            fetched_at: Some(now),
        };

        if self.holdings.is_empty() {
            return Ok(empty);
        }

        let catalog = self.provider.list_assets().await?;
        // Case-sensitive match on the symbol as the catalog spells it.
        let resolved: Vec<_> = catalog
            .into_iter()
            .filter(|asset| self.holdings.contains_key(&asset.symbol))
            .collect();

        // Nothing resolved is a successful (empty) cycle, not a failure.
        if resolved.is_empty() {
            return Ok(empty);
        }

        let ids: Vec<String> = resolved.iter().map(|asset| asset.id.clone()).collect();
        let prices = self.provider.fetch_prices(&ids, &self.currency).await?;

        let mut ticks = HashMap::new();
        for symbol in self.holdings.keys() {
            // Symbol collisions in the catalog: first match wins.
            let Some(asset) = resolved.iter().find(|asset| asset.symbol == *symbol) else {
                continue;
            };
            // A symbol the provider did not price is omitted, not an error.
            let Some(price) = prices.get(&asset.id) else {
                continue;
            };
            ticks.insert(
                symbol.clone(),
                PriceTick {
                    price: price.price,
                    volume_24h: price.volume_24h,
                    change_24h: price.change_24h,
                    currency: self.currency.clone(),
                    observed_at: now,
                },
            );
        }

        Ok(PriceSnapshot {
            ticks,
            fetched_at: Some(now),
        })
    }

    fn on_success(&mut self, snapshot: PriceSnapshot) {
        // A stop that raced the fetch wins: the cycle's result is dropped.
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let now = self.clock.now();
        self.state.is_connected = true;
        self.state.last_update_at = now;
        self.state.next_update_at =
            now + chrono::Duration::milliseconds(self.interval_ms as i64);
        self.state.update_interval_ms = self.interval_ms;
        self.state.retry_count = 0;
        let _ = self.conn_tx.send(self.state.clone());

        debug!(symbols = snapshot.ticks.len(), "price snapshot published");
        let run_alert_pass = !snapshot.ticks.is_empty();
        let _ = self.snapshot_tx.send(snapshot.clone());

        if run_alert_pass {
            self.schedule_evaluation(snapshot);
        }
    }

    /// Arm the deferred alert pass for this cycle, replacing any pass still
    /// pending from the previous one so evaluations never overlap.
    ///
    /// The stopped check happens under the eval slot's lock: either this
    /// runs before `stop` drains the slot (and the new task gets drained
    /// with it), or after (and nothing is spawned). A pass can never slip
    /// in behind a completed stop.
    fn schedule_evaluation(&mut self, snapshot: PriceSnapshot) {
        let Some(handler) = self.handler.clone() else {
            return;
        };
        let delay = Duration::from_millis(self.policy.post_fetch_alert_delay_ms);

        let mut slot = self.eval_task.lock().unwrap();
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handler.on_snapshot(&snapshot).await;
        });
        if let Some(prev) = slot.replace(task) {
            prev.abort();
        }
    }

    fn on_failure(&mut self, err: ProviderError) {
        let now = self.clock.now();
        self.state.is_connected = false;
        self.state.retry_count += 1;
        self.interval_ms = self.policy.backoff(self.interval_ms);
        self.state.update_interval_ms = self.interval_ms;
        self.state.next_update_at =
            now + chrono::Duration::milliseconds(self.interval_ms as i64);

        warn!(
            retry = self.state.retry_count,
            interval_ms = self.interval_ms,
            error = %err,
            "fetch cycle failed, backing off"
        );
        if self.state.retry_count >= self.state.max_retries {
            // Reported, not fatal: polling continues at the capped interval.
            warn!(
                retries = self.state.retry_count,
                "max retries reached, staying at lengthened update interval"
            );
        }

        let _ = self.conn_tx.send(self.state.clone());
    }
}
