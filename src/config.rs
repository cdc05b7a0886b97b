//! Runtime configuration
//!
//! Read from a JSON file; every field has a default so a missing or partial
//! file is fine. `STOCKSYNC_LEDGER_URL` and `STOCKSYNC_DATA_DIR` override
//! the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StockError;
use crate::ledger::Scope;

pub const ENV_LEDGER_URL: &str = "STOCKSYNC_LEDGER_URL";
pub const ENV_DATA_DIR: &str = "STOCKSYNC_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// HTTP ledger endpoint. Sync commands are unavailable without one.
    pub ledger_url: Option<String>,
    /// Directory of the JSON record store.
    pub data_dir: PathBuf,
    /// Upper bound for one ledger round trip.
    pub request_timeout_ms: u64,
    /// Consecutive conflicts tolerated per id before giving up.
    pub max_conflict_retries: u32,
    /// Scope used by pulls unless overridden.
    pub default_scope: Scope,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ledger_url: None,
            data_dir: default_data_dir(),
            request_timeout_ms: 10_000,
            max_conflict_retries: 3,
            default_scope: Scope::All,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
        .join(".stocksync/records")
}

impl SyncConfig {
    /// Load from `path` (defaults when the file does not exist), then apply
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self, StockError> {
        let mut config = if path.exists() {
            let data = std::fs::read(path)
                .map_err(|e| StockError::Config(format!("{}: {}", path.display(), e)))?;
            serde_json::from_slice(&data)
                .map_err(|e| StockError::Config(format!("{}: {}", path.display(), e)))?
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            SyncConfig::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_LEDGER_URL) {
            if !url.is_empty() {
                self.ledger_url = Some(url);
            }
        }
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
    }

    fn validate(&self) -> Result<(), StockError> {
        if self.max_conflict_retries == 0 {
            return Err(StockError::Config(
                "max_conflict_retries must be at least 1".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(StockError::Config("request_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
