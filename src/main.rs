//! Coinwatch - track a crypto portfolio with live prices and alerts.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use coinwatch::alerts::AlertBook;
use coinwatch::api::CoinGeckoClient;
use coinwatch::cli::Args;
use coinwatch::config::{self, Config};
use coinwatch::export::export_portfolio;
use coinwatch::models::{ConnectivityState, Holdings, PriceSnapshot};
use coinwatch::notify::ConsoleSink;
use coinwatch::portfolio::total_value;
use coinwatch::scheduler::{RefreshPolicy, RefreshScheduler, SnapshotHandler};
use coinwatch::store::select_store;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse_args();

    init_tracing(args.verbose);

    // Load configuration
    let config = if let Some(ref path) = args.config {
        Config::load(path)?
    } else {
        Config::load_or_default()
    };

    let currency = args
        .currency
        .clone()
        .unwrap_or_else(|| config.general.currency.clone())
        .to_uppercase();

    // Pick the persistence backend for this session.
    let store = select_store(args.signed_in)?;
    let holdings = match store.load_holdings().await {
        Ok((holdings, _prefs)) if !holdings.is_empty() => holdings,
        Ok(_) => config.get_holdings(),
        Err(err) => {
            warn!(error = %err, "failed to load saved portfolio, using config holdings");
            config.get_holdings()
        }
    };

    // Check if we have any holdings to track
    if holdings.is_empty() {
        eprintln!("Error: No holdings to track.");
        eprintln!("Add holdings to your config file or saved portfolio.");
        eprintln!();
        eprintln!("Config file location: {:?}", Config::default_config_path());
        eprintln!();
        eprintln!("Sample config:");
        eprintln!("{}", config::sample_config());
        std::process::exit(1);
    }

    let mut policy = RefreshPolicy::from(&config.refresh);
    if let Some(delay) = args.delay {
        policy.poll_interval_ms = policy.clamp((delay * 1000.0) as u64);
    }
    let interval_ms = policy.poll_interval_ms;

    // Wire the engine together: provider, sink, alert book, scheduler.
    let provider = Arc::new(CoinGeckoClient::new(args.timeout)?);
    let audio = args.audio_alerts || config.general.audio_alerts;
    let sink = Arc::new(ConsoleSink::new(audio));
    let book = Arc::new(AlertBook::new(store.clone(), sink));
    book.load().await;
    book.seed(&config.get_alerts()).await;

    let mut scheduler = RefreshScheduler::new(provider, policy, currency.clone())
        .with_handler(book.clone() as Arc<dyn SnapshotHandler>);
    let mut snapshots = scheduler.subscribe_snapshots();
    let connectivity = scheduler.connectivity();

    scheduler.start(holdings.clone(), interval_ms);
    if let Some(handle) = scheduler.handle() {
        // Cadence follows the alert load from the first cycle on.
        handle.apply_alert_load(book.active_count().await);
        book.attach_scheduler(handle);
    }

    // Main loop: print a portfolio summary per completed refresh cycle.
    let mut cycles: u64 = 0;
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                let state = connectivity.borrow().clone();
                print_summary(&holdings, &snapshot, &state, &currency);

                cycles += 1;
                if args.iterations != 0 && cycles >= args.iterations {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    scheduler.stop();

    if let Some(format) = args.export {
        let snapshot = snapshots.borrow().clone();
        print!(
            "{}",
            export_portfolio(&holdings, &snapshot, 1.0, format.into())
        );
    }

    Ok(())
}

/// Log to stderr so piped stdout stays clean for summaries and exports.
fn init_tracing(verbose: bool) {
    let default_directive = if verbose {
        "coinwatch=debug"
    } else {
        "coinwatch=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// One summary block per refresh cycle, batch-mode style.
fn print_summary(
    holdings: &Holdings,
    snapshot: &PriceSnapshot,
    state: &ConnectivityState,
    currency: &str,
) {
    let totals = total_value(holdings, snapshot, 1.0);
    let next_in = humantime::format_duration(Duration::from_millis(state.update_interval_ms));

    println!(
        "portfolio: {:.2} {} (basis {:.2}, p/l {:+.2})",
        totals.total_value,
        currency,
        totals.total_basis,
        totals.profit_loss(),
    );
    let mut symbols: Vec<_> = holdings.keys().collect();
    symbols.sort();
    for symbol in symbols {
        match snapshot.ticks.get(symbol) {
            Some(tick) => println!(
                "  {:<8} {:>14.2} {} ({:+.2}% 24h)",
                symbol.to_uppercase(),
                tick.price,
                currency,
                tick.change_24h,
            ),
            None => println!("  {:<8} {:>14}", symbol.to_uppercase(), "no price"),
        }
    }
    if !state.is_connected {
        println!(
            "  (disconnected, retry {}/{})",
            state.retry_count, state.max_retries
        );
    }
    println!("  next update in {next_in}");
    println!();
}
