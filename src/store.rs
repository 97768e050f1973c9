//! Persistence capability: load and save holdings, preferences, and alerts.
//!
//! The engine is agnostic to which backend is active; an authentication flag
//! selects the store for the session. A load failure is non-fatal; callers
//! degrade to defaults and keep going.

use crate::error::Error;
use crate::models::{Alert, Holdings, Preferences};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Storage backend for a user's portfolio and alert list.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn load_holdings(&self) -> Result<(Holdings, Preferences), Error>;
    async fn save_holdings(&self, holdings: &Holdings, prefs: &Preferences) -> Result<(), Error>;
    async fn load_alerts(&self) -> Result<Vec<Alert>, Error>;
    async fn save_alerts(&self, alerts: &[Alert]) -> Result<(), Error>;
}

/// On-disk layout of the portfolio file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PortfolioFile {
    #[serde(default)]
    coinz: Holdings,
    #[serde(default)]
    pref: Preferences,
}

/// JSON-file store under the platform config directory.
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Store rooted at the default data location for the given scope
    /// ("local" for anonymous sessions, "account" for signed-in ones).
    pub fn at_default(scope: &str) -> anyhow::Result<Self> {
        let base = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("no config directory available on this platform"))?;
        Ok(Self::new(base.join("coinwatch").join(scope)))
    }

    fn portfolio_path(&self) -> PathBuf {
        self.dir.join("portfolio.json")
    }

    fn alerts_path(&self) -> PathBuf {
        self.dir.join("alerts.json")
    }

    fn write_json<T: Serialize>(&self, path: &PathBuf, value: &T) -> Result<(), Error> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Persistence(format!("create {}: {e}", self.dir.display())))?;
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| Error::Persistence(e.to_string()))?;
        fs::write(path, json)
            .map_err(|e| Error::Persistence(format!("write {}: {e}", path.display())))
    }

    fn read_json<T: for<'de> Deserialize<'de> + Default>(&self, path: &PathBuf) -> Result<T, Error> {
        if !path.exists() {
            // First run: nothing saved yet, start from defaults.
            return Ok(T::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Persistence(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Persistence(format!("parse {}: {e}", path.display())))
    }
}

#[async_trait]
impl PersistenceStore for LocalStore {
    async fn load_holdings(&self) -> Result<(Holdings, Preferences), Error> {
        let file: PortfolioFile = self.read_json(&self.portfolio_path())?;
        Ok((file.coinz, file.pref))
    }

    async fn save_holdings(&self, holdings: &Holdings, prefs: &Preferences) -> Result<(), Error> {
        let file = PortfolioFile {
            coinz: holdings.clone(),
            pref: prefs.clone(),
        };
        self.write_json(&self.portfolio_path(), &file)
    }

    async fn load_alerts(&self) -> Result<Vec<Alert>, Error> {
        self.read_json(&self.alerts_path())
    }

    async fn save_alerts(&self, alerts: &[Alert]) -> Result<(), Error> {
        self.write_json(&self.alerts_path(), &alerts.to_vec())
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    portfolio: Mutex<(Holdings, Preferences)>,
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn load_holdings(&self) -> Result<(Holdings, Preferences), Error> {
        Ok(self.portfolio.lock().await.clone())
    }

    async fn save_holdings(&self, holdings: &Holdings, prefs: &Preferences) -> Result<(), Error> {
        *self.portfolio.lock().await = (holdings.clone(), prefs.clone());
        Ok(())
    }

    async fn load_alerts(&self) -> Result<Vec<Alert>, Error> {
        Ok(self.alerts.lock().await.clone())
    }

    async fn save_alerts(&self, alerts: &[Alert]) -> Result<(), Error> {
        *self.alerts.lock().await = alerts.to_vec();
        Ok(())
    }
}

/// Pick the storage backend for this session. Signed-in users get the
/// account-scoped store; anonymous sessions stay on the local device file.
pub fn select_store(signed_in: bool) -> anyhow::Result<std::sync::Arc<dyn PersistenceStore>> {
    let scope = if signed_in { "account" } else { "local" };
    Ok(std::sync::Arc::new(LocalStore::at_default(scope)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertKind, AlertStatus, Holding};
    use chrono::Utc;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let mut holdings = Holdings::new();
        holdings.insert(
            "btc".to_string(),
            Holding {
                symbol: "btc".to_string(),
                cost_basis: 10_000.0,
                quantity: 0.5,
            },
        );

        store
            .save_holdings(&holdings, &Preferences::default())
            .await
            .unwrap();
        let (loaded, prefs) = store.load_holdings().await.unwrap();
        assert_eq!(loaded["btc"].quantity, 0.5);
        assert_eq!(prefs.currency, "USD");
    }

    #[tokio::test]
    async fn test_memory_store_alerts_roundtrip() {
        let store = MemoryStore::new();
        let alerts = vec![Alert {
            id: "a1".to_string(),
            coin: "eth".to_string(),
            kind: AlertKind::Below,
            target_price: 1500.0,
            status: AlertStatus::Active,
            created_at: Utc::now(),
        }];

        store.save_alerts(&alerts).await.unwrap();
        let loaded = store.load_alerts().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].coin, "eth");
    }

    #[tokio::test]
    async fn test_local_store_missing_files_default() {
        let store = LocalStore::new(std::env::temp_dir().join("coinwatch-test-none"));
        let (holdings, prefs) = store.load_holdings().await.unwrap();
        assert!(holdings.is_empty());
        assert_eq!(prefs.currency, "USD");
        assert!(store.load_alerts().await.unwrap().is_empty());
    }
}
