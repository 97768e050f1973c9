//! Market data capability and the default CoinGecko client.
//!
//! The engine never talks HTTP directly; it goes through the
//! [`MarketDataProvider`] trait so tests can substitute a canned provider.

use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const COINGECKO_URL: &str = "https://api.coingecko.com/api/v3";

/// Some public API gateways get picky about default client user agents.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// A provider's canonical identifier for one asset.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetId {
    /// Provider-canonical id (e.g., "bitcoin")
    pub id: String,
    /// Ticker symbol as the provider catalogs it (e.g., "btc")
    pub symbol: String,
}

/// Current market data for one provider asset id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderPrice {
    pub price: f64,
    pub volume_24h: f64,
    pub change_24h: f64,
}

/// Source of live market data. Network-bound and unreliable; every method
/// fails with [`ProviderError::Unavailable`] on network errors or
/// non-success statuses, and the scheduler absorbs those via backoff.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Full catalog of assets the provider knows: canonical id plus ticker.
    async fn list_assets(&self) -> Result<Vec<AssetId>, ProviderError>;

    /// Current price/volume/24h-change per asset id, quoted in `currency`.
    /// Ids the provider cannot price are simply absent from the result.
    async fn fetch_prices(
        &self,
        ids: &[String],
        currency: &str,
    ) -> Result<HashMap<String, ProviderPrice>, ProviderError>;
}

/// CoinGecko REST client.
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
}

impl CoinGeckoClient {
    /// Create a new client with the given request timeout.
    pub fn new(timeout_secs: u64) -> anyhow::Result<Self> {
        use anyhow::Context;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: COINGECKO_URL.to_string(),
        })
    }

    /// Point the client at a different base URL (local mock servers).
    #[allow(dead_code)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl MarketDataProvider for CoinGeckoClient {
    async fn list_assets(&self) -> Result<Vec<AssetId>, ProviderError> {
        let url = format!("{}/coins/list", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(ProviderError::Unavailable(format!(
                "coins list returned HTTP {}",
                response.status()
            )));
        }

        let assets: Vec<AssetId> = response.json().await?;
        Ok(assets)
    }

    async fn fetch_prices(
        &self,
        ids: &[String],
        currency: &str,
    ) -> Result<HashMap<String, ProviderPrice>, ProviderError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let vs = currency.to_lowercase();
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies={}&include_24hr_vol=true&include_24hr_change=true",
            self.base_url,
            urlencoding::encode(&ids.join(",")),
            vs,
        );

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(ProviderError::Unavailable(format!(
                "price fetch returned HTTP {}",
                response.status()
            )));
        }

        let raw: SimplePriceResponse = response.json().await?;
        Ok(parse_simple_price(raw, &vs))
    }
}

/// `/simple/price` body: a map of id -> field -> number, where the field
/// names embed the quote currency ("usd", "usd_24h_vol", "usd_24h_change").
/// Volume and change can be null for thin markets.
type SimplePriceResponse = HashMap<String, HashMap<String, Option<f64>>>;

fn parse_simple_price(raw: SimplePriceResponse, currency: &str) -> HashMap<String, ProviderPrice> {
    let vol_key = format!("{currency}_24h_vol");
    let change_key = format!("{currency}_24h_change");

    let mut prices = HashMap::with_capacity(raw.len());
    for (id, fields) in raw {
        // No price in the requested currency means the entry is unusable.
        let Some(price) = fields.get(currency).copied().flatten() else {
            continue;
        };
        prices.insert(
            id,
            ProviderPrice {
                price,
                volume_24h: fields.get(&vol_key).copied().flatten().unwrap_or(0.0),
                change_24h: fields.get(&change_key).copied().flatten().unwrap_or(0.0),
            },
        );
    }
    prices
}
