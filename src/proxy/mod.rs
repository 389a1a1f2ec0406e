//! Proxy pool: tiered selection, free-list harvesting and maintenance
//!
//! Premium and standard tiers hold provider-supplied proxies with per-request
//! cost and usage limits. The free tier is filled by [`update_free_pool`]
//! from public lists, validated before storage. [`TieredProxyManager`] hands
//! out proxies in tier order and feeds request outcomes back into their
//! health stats. [`ProxyMaintenance`] runs the periodic chores: daily counter
//! resets, expiry purges and free-pool refreshes.

mod harvest;
mod manager;

pub use harvest::update_free_pool;
pub use manager::{SelectedProxy, TieredProxyManager};

use chrono::{DateTime, NaiveDate, Utc};

use crate::config::ProxyConfig;
use crate::queue::{SharedStorage, StorageGuard};
use crate::storage::{Storage, StorageError};
use crate::Result;

/// Minimum spacing between purge and refresh passes
const HOURLY_INTERVAL_SECS: i64 = 3600;

/// Periodic proxy pool upkeep
///
/// Intended to be polled between crawl batches; each call checks what is
/// due and skips the rest, so calling it often is cheap.
pub struct ProxyMaintenance {
    storage: SharedStorage,
    config: ProxyConfig,
    last_reset_day: Option<NaiveDate>,
    last_hourly: Option<DateTime<Utc>>,
}

impl ProxyMaintenance {
    pub fn new(storage: SharedStorage, config: ProxyConfig) -> Self {
        Self {
            storage,
            config,
            last_reset_day: None,
            last_hourly: None,
        }
    }

    fn lock(&self) -> Result<StorageGuard<'_>> {
        self.storage
            .lock()
            .map_err(|_| StorageError::Database("storage lock poisoned".to_string()).into())
    }

    /// Runs whichever chores are due at `now`
    pub async fn run(&mut self, now: DateTime<Utc>) -> Result<()> {
        let today = now.date_naive();
        if self.last_reset_day != Some(today) {
            let reset = self.lock()?.reset_daily_counters()?;
            if reset > 0 {
                tracing::info!(count = reset, "daily proxy counters reset");
            }
            self.last_reset_day = Some(today);
        }

        let hourly_due = match self.last_hourly {
            Some(last) => (now - last).num_seconds() >= HOURLY_INTERVAL_SECS,
            None => true,
        };
        if hourly_due {
            let purged = self.lock()?.purge_expired_proxies()?;
            if purged > 0 {
                tracing::info!(count = purged, "expired proxies purged");
            }
            if self.config.enabled && !self.config.free_sources.is_empty() {
                let stored =
                    update_free_pool(std::sync::Arc::clone(&self.storage), &self.config).await?;
                tracing::info!(count = stored, "free proxy pool refreshed");
            }
            self.last_hourly = Some(now);
        }

        Ok(())
    }
}
