//! Refresh scheduler and alert engine tests against a canned provider.
//!
//! Time is paused: `tokio::time` auto-advances whenever every task is
//! blocked on a timer, so multi-cycle backoff runs in microseconds.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use coinwatch::alerts::{AlertBook, AlertDraft};
use coinwatch::api::{AssetId, MarketDataProvider, ProviderPrice};
use coinwatch::error::ProviderError;
use coinwatch::models::{AlertKind, AlertStatus, Holding, Holdings, TriggeredAlert};
use coinwatch::notify::NotificationSink;
use coinwatch::scheduler::{RefreshPolicy, RefreshScheduler, SnapshotHandler};
use coinwatch::store::{MemoryStore, PersistenceStore};

/// Provider serving fixed prices, with a failure switch.
struct MockProvider {
    fail: AtomicBool,
    fetch_calls: AtomicUsize,
}

impl MockProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
            fetch_calls: AtomicUsize::new(0),
        })
    }

    fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    async fn list_assets(&self) -> Result<Vec<AssetId>, ProviderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("connection refused".into()));
        }
        Ok(vec![
            AssetId {
                id: "bitcoin".to_string(),
                symbol: "btc".to_string(),
            },
            AssetId {
                id: "ethereum".to_string(),
                symbol: "eth".to_string(),
            },
        ])
    }

    async fn fetch_prices(
        &self,
        ids: &[String],
        _currency: &str,
    ) -> Result<HashMap<String, ProviderPrice>, ProviderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("connection refused".into()));
        }
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let mut prices = HashMap::new();
        for id in ids {
            let price = match id.as_str() {
                "bitcoin" => 110.0,
                "ethereum" => 1400.0,
                _ => continue,
            };
            prices.insert(
                id.clone(),
                ProviderPrice {
                    price,
                    volume_24h: 1.0e9,
                    change_24h: 1.5,
                },
            );
        }
        Ok(prices)
    }
}

/// Sink that only counts deliveries.
#[derive(Default)]
struct CountingSink {
    count: AtomicUsize,
}

#[async_trait]
impl NotificationSink for CountingSink {
    async fn notify(&self, _triggered: &TriggeredAlert) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

fn holdings_of(symbols: &[&str]) -> Holdings {
    symbols
        .iter()
        .map(|s| {
            (
                s.to_string(),
                Holding {
                    symbol: s.to_string(),
                    cost_basis: 100.0,
                    quantity: 1.0,
                },
            )
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn first_cycle_publishes_snapshot() {
    let provider = MockProvider::new();
    let mut scheduler =
        RefreshScheduler::new(provider.clone(), RefreshPolicy::default(), "USD");
    let mut snapshots = scheduler.subscribe_snapshots();

    scheduler.start(holdings_of(&["btc", "eth"]), 60_000);
    snapshots.changed().await.unwrap();

    let snapshot = snapshots.borrow().clone();
    assert!(snapshot.is_fetched());
    assert_eq!(snapshot.price_of("btc"), Some(110.0));
    assert_eq!(snapshot.price_of("eth"), Some(1400.0));

    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn empty_holdings_publish_empty_snapshot_without_network() {
    let provider = MockProvider::new();
    let mut scheduler =
        RefreshScheduler::new(provider.clone(), RefreshPolicy::default(), "USD");
    let mut snapshots = scheduler.subscribe_snapshots();

    scheduler.start(Holdings::new(), 60_000);
    snapshots.changed().await.unwrap();

    let snapshot = snapshots.borrow().clone();
    assert!(snapshot.is_fetched());
    assert!(snapshot.ticks.is_empty());
    assert_eq!(provider.fetch_calls.load(Ordering::SeqCst), 0);

    let state = scheduler.connectivity().borrow().clone();
    assert!(state.is_connected);

    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn failure_backs_off_and_success_resets_retries() {
    let provider = MockProvider::new();
    provider.set_failing(true);

    let mut scheduler =
        RefreshScheduler::new(provider.clone(), RefreshPolicy::default(), "USD");
    let mut snapshots = scheduler.subscribe_snapshots();
    let mut connectivity = scheduler.connectivity();

    scheduler.start(holdings_of(&["btc"]), 60_000);

    // First (immediate) cycle fails: disconnected, interval grown by 1.5x.
    connectivity.changed().await.unwrap();
    let state = connectivity.borrow().clone();
    assert!(!state.is_connected);
    assert_eq!(state.retry_count, 1);
    assert_eq!(state.update_interval_ms, 90_000);

    // The snapshot stays untouched by failed cycles.
    assert!(!snapshots.borrow().is_fetched());

    // Provider recovers; the next timed cycle succeeds.
    provider.set_failing(false);
    snapshots.changed().await.unwrap();

    let state = connectivity.borrow().clone();
    assert!(state.is_connected);
    assert_eq!(state.retry_count, 0);
    // Recovery keeps the lengthened cadence rather than snapping back.
    assert_eq!(state.update_interval_ms, 90_000);

    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn backoff_growth_caps_at_max_interval() {
    let provider = MockProvider::new();
    provider.set_failing(true);

    let mut scheduler =
        RefreshScheduler::new(provider.clone(), RefreshPolicy::default(), "USD");
    let mut connectivity = scheduler.connectivity();

    scheduler.start(holdings_of(&["btc"]), 60_000);

    let mut previous = 60_000;
    let mut state = connectivity.borrow().clone();
    while state.retry_count < 8 {
        connectivity.changed().await.unwrap();
        state = connectivity.borrow().clone();
        assert!(state.update_interval_ms >= previous);
        assert!(state.update_interval_ms <= 300_000);
        previous = state.update_interval_ms;
    }
    // Polling never stops: retries pass max_retries and stay at the cap.
    assert!(state.retry_count > state.max_retries);
    assert_eq!(state.update_interval_ms, 300_000);

    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn refresh_now_runs_an_extra_cycle() {
    let provider = MockProvider::new();
    let mut scheduler =
        RefreshScheduler::new(provider.clone(), RefreshPolicy::default(), "USD");
    let mut snapshots = scheduler.subscribe_snapshots();

    scheduler.start(holdings_of(&["btc"]), 60_000);
    snapshots.changed().await.unwrap();
    let calls_after_first = provider.fetch_calls.load(Ordering::SeqCst);

    scheduler.refresh_now(None);
    snapshots.changed().await.unwrap();
    assert!(provider.fetch_calls.load(Ordering::SeqCst) > calls_after_first);

    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn refresh_now_swaps_holdings() {
    let provider = MockProvider::new();
    let mut scheduler =
        RefreshScheduler::new(provider.clone(), RefreshPolicy::default(), "USD");
    let mut snapshots = scheduler.subscribe_snapshots();

    scheduler.start(holdings_of(&["btc"]), 60_000);
    snapshots.changed().await.unwrap();
    assert_eq!(snapshots.borrow().ticks.len(), 1);

    scheduler.refresh_now(Some(holdings_of(&["btc", "eth"])));
    snapshots.changed().await.unwrap();

    let snapshot = snapshots.borrow().clone();
    assert_eq!(snapshot.ticks.len(), 2);
    assert_eq!(snapshot.price_of("eth"), Some(1400.0));

    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn triggered_alert_notifies_exactly_once() {
    let provider = MockProvider::new();
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let sink = Arc::new(CountingSink::default());
    let book = Arc::new(AlertBook::new(store.clone(), sink.clone()));

    book.add(
        AlertDraft {
            coin: "btc".to_string(),
            kind: AlertKind::Above,
            target_price: 100.0,
        },
        None,
    )
    .await
    .unwrap();

    let mut scheduler = RefreshScheduler::new(provider.clone(), RefreshPolicy::default(), "USD")
        .with_handler(book.clone() as Arc<dyn SnapshotHandler>);
    let mut snapshots = scheduler.subscribe_snapshots();

    scheduler.start(holdings_of(&["btc"]), 60_000);

    // Let several refresh cycles and their deferred alert passes run.
    for _ in 0..3 {
        snapshots.changed().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_000)).await;
    }

    // The price stays over the target every cycle, but the alert moved to
    // Triggered on the first pass and must not fire again.
    assert_eq!(sink.count.load(Ordering::SeqCst), 1);

    let persisted = store.load_alerts().await.unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].status, AlertStatus::Triggered);

    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_the_deferred_alert_pass() {
    let provider = MockProvider::new();
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let sink = Arc::new(CountingSink::default());
    let book = Arc::new(AlertBook::new(store.clone(), sink.clone()));

    book.add(
        AlertDraft {
            coin: "btc".to_string(),
            kind: AlertKind::Above,
            target_price: 100.0,
        },
        None,
    )
    .await
    .unwrap();

    let mut scheduler = RefreshScheduler::new(provider.clone(), RefreshPolicy::default(), "USD")
        .with_handler(book.clone() as Arc<dyn SnapshotHandler>);
    let mut snapshots = scheduler.subscribe_snapshots();

    scheduler.start(holdings_of(&["btc"]), 60_000);
    snapshots.changed().await.unwrap();

    // Stop inside the post-fetch delay window: the pending pass is dropped.
    scheduler.stop();
    tokio::time::sleep(Duration::from_millis(5_000)).await;

    assert_eq!(sink.count.load(Ordering::SeqCst), 0);
    let persisted = store.load_alerts().await.unwrap();
    assert_eq!(persisted[0].status, AlertStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn interval_commands_rearm_the_recurring_timer() {
    let provider = MockProvider::new();
    let mut scheduler =
        RefreshScheduler::new(provider.clone(), RefreshPolicy::default(), "USD");
    let mut snapshots = scheduler.subscribe_snapshots();
    let mut connectivity = scheduler.connectivity();

    scheduler.start(holdings_of(&["btc"]), 60_000);
    snapshots.changed().await.unwrap();
    // Drain the first cycle's connectivity update before sending commands.
    connectivity.borrow_and_update();
    let handle = scheduler.handle().unwrap();

    handle.set_interval_policy(120_000);
    connectivity.changed().await.unwrap();
    assert_eq!(connectivity.borrow().update_interval_ms, 120_000);

    // Requests outside the policy bounds are clamped.
    handle.set_interval_policy(1_000);
    connectivity.changed().await.unwrap();
    assert_eq!(connectivity.borrow().update_interval_ms, 30_000);

    // Six armed alerts tighten the cadence to 45s.
    handle.apply_alert_load(6);
    connectivity.changed().await.unwrap();
    assert_eq!(connectivity.borrow().update_interval_ms, 45_000);

    // The rearmed timer, not the old one, drives the next cycle.
    let calls = provider.fetch_calls.load(Ordering::SeqCst);
    snapshots.changed().await.unwrap();
    assert!(provider.fetch_calls.load(Ordering::SeqCst) > calls);

    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn status_only_mutations_keep_the_backed_off_interval() {
    let provider = MockProvider::new();
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let sink = Arc::new(CountingSink::default());
    let book = Arc::new(AlertBook::new(store, sink.clone()));

    book.add(
        AlertDraft {
            coin: "btc".to_string(),
            kind: AlertKind::Above,
            target_price: 100.0,
        },
        None,
    )
    .await
    .unwrap();

    let mut scheduler = RefreshScheduler::new(provider.clone(), RefreshPolicy::default(), "USD")
        .with_handler(book.clone() as Arc<dyn SnapshotHandler>);
    let mut snapshots = scheduler.subscribe_snapshots();
    let mut connectivity = scheduler.connectivity();

    scheduler.start(holdings_of(&["btc"]), 60_000);
    book.attach_scheduler(scheduler.handle().unwrap());

    // First cycle fires the alert; the active count drops to zero.
    snapshots.changed().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(sink.count.load(Ordering::SeqCst), 1);

    // The next cycle fails and the interval grows.
    provider.set_failing(true);
    loop {
        connectivity.changed().await.unwrap();
        if !connectivity.borrow().is_connected {
            break;
        }
    }
    assert_eq!(connectivity.borrow().update_interval_ms, 90_000);

    // Dismissing the triggered alert leaves the active count at zero, so
    // the cadence policy must not reset the grown interval.
    let id = book.alerts().await[0].id.clone();
    assert!(book.dismiss(&id).await);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(connectivity.borrow().update_interval_ms, 90_000);

    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn restart_after_stop_runs_a_clean_generation() {
    let provider = MockProvider::new();
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let sink = Arc::new(CountingSink::default());
    let book = Arc::new(AlertBook::new(store.clone(), sink.clone()));

    book.add(
        AlertDraft {
            coin: "btc".to_string(),
            kind: AlertKind::Above,
            target_price: 100.0,
        },
        None,
    )
    .await
    .unwrap();

    let mut scheduler = RefreshScheduler::new(provider.clone(), RefreshPolicy::default(), "USD")
        .with_handler(book.clone() as Arc<dyn SnapshotHandler>);
    let mut snapshots = scheduler.subscribe_snapshots();

    scheduler.start(holdings_of(&["btc"]), 60_000);
    snapshots.changed().await.unwrap();

    // Stop inside the post-fetch window: nothing from this generation may
    // publish or notify afterwards.
    scheduler.stop();
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(sink.count.load(Ordering::SeqCst), 0);
    assert_eq!(store.load_alerts().await.unwrap()[0].status, AlertStatus::Active);

    // A restart gets a fresh generation: the new cycle evaluates normally.
    scheduler.start(holdings_of(&["btc"]), 60_000);
    snapshots.changed().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(sink.count.load(Ordering::SeqCst), 1);
    assert_eq!(
        store.load_alerts().await.unwrap()[0].status,
        AlertStatus::Triggered
    );

    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn rearmed_alert_can_trigger_again() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let sink = Arc::new(CountingSink::default());
    let book = Arc::new(AlertBook::new(store, sink.clone()));

    let alert = book
        .add(
            AlertDraft {
                coin: "btc".to_string(),
                kind: AlertKind::Above,
                target_price: 100.0,
            },
            None,
        )
        .await
        .unwrap();

    let mut ticks = HashMap::new();
    ticks.insert(
        "btc".to_string(),
        coinwatch::models::PriceTick {
            price: 110.0,
            volume_24h: 0.0,
            change_24h: 0.0,
            currency: "USD".to_string(),
            observed_at: chrono::Utc::now(),
        },
    );
    let snapshot = coinwatch::models::PriceSnapshot {
        ticks,
        fetched_at: Some(chrono::Utc::now()),
    };

    book.evaluate_snapshot(&snapshot).await;
    book.evaluate_snapshot(&snapshot).await;
    assert_eq!(sink.count.load(Ordering::SeqCst), 1);

    // Dismiss, then re-arm, and the same threshold fires again.
    assert!(book.dismiss(&alert.id).await);
    let status = book.toggle(&alert.id).await;
    assert_eq!(status, Some(AlertStatus::Active));

    book.evaluate_snapshot(&snapshot).await;
    assert_eq!(sink.count.load(Ordering::SeqCst), 2);
}
