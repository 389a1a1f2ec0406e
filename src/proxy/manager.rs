//! Tiered proxy selection
//!
//! Tier order follows the prefer-paid setting: premium then standard, with a
//! free fallback when enabled, or free-first when paid is not preferred.
//! Within a paid tier, the top candidates are re-ranked by cost-effectiveness
//! rather than taking the database ordering head outright.

use crate::config::ProxyConfig;
use crate::queue::{SharedStorage, StorageGuard};
use crate::state::{ProxyStatus, ProxyTier};
use crate::storage::{ProxyRecord, Storage, StorageError};
use crate::Result;

/// Guards against division by a zero per-request cost
const COST_EPSILON: f64 = 1e-6;

/// Candidates pulled per tier before re-ranking
const CANDIDATE_LIMIT: u32 = 10;

/// Weight of the success-rate EMA's history term
const EMA_ALPHA: f64 = 0.9;

/// A proxy handed out for one or more requests
#[derive(Debug, Clone)]
pub struct SelectedProxy {
    pub id: i64,
    pub tier: ProxyTier,
    pub connection_url: String,
}

/// Tier-aware proxy pool frontend
pub struct TieredProxyManager {
    storage: SharedStorage,
    config: ProxyConfig,
}

impl TieredProxyManager {
    pub fn new(storage: SharedStorage, config: ProxyConfig) -> Self {
        Self { storage, config }
    }

    fn lock(&self) -> Result<StorageGuard<'_>> {
        self.storage
            .lock()
            .map_err(|_| StorageError::Database("storage lock poisoned".to_string()).into())
    }

    /// Picks the best available proxy, or None for a direct connection
    ///
    /// Persisted settings override the config file so `proxy configure`
    /// takes effect without a restart.
    pub fn get_proxy(&self) -> Result<Option<SelectedProxy>> {
        let (tiers, min_success_rate, max_cost) = {
            let storage = self.lock()?;
            let settings = storage.get_proxy_settings()?;
            let tiers = tier_order(settings.prefer_paid, settings.fallback_to_free);
            (tiers, settings.min_success_rate, settings.max_cost_per_request)
        };

        for tier in tiers {
            let candidates = {
                let storage = self.lock()?;
                storage.candidate_proxies(tier, min_success_rate, CANDIDATE_LIMIT)?
            };

            let candidates: Vec<ProxyRecord> = candidates
                .into_iter()
                .filter(|candidate| match max_cost {
                    Some(ceiling) => candidate.cost_per_request <= ceiling,
                    None => true,
                })
                .collect();

            let Some(chosen) = (if tier.is_paid() {
                pick_cost_effective(&candidates)
            } else {
                candidates.first()
            }) else {
                continue;
            };

            let selected = SelectedProxy {
                id: chosen.id,
                tier: chosen.tier,
                connection_url: chosen.connection_url(),
            };

            self.lock()?.record_proxy_selection(chosen.id)?;
            tracing::debug!(
                proxy_id = selected.id,
                tier = %selected.tier,
                "proxy selected"
            );
            return Ok(Some(selected));
        }

        tracing::debug!("no proxy available, using direct connection");
        Ok(None)
    }

    /// Feeds back one request outcome into the proxy's health stats
    ///
    /// Success rate and response time move as exponential moving averages.
    /// Enough consecutive failures blacklists the proxy.
    pub fn record_result(
        &self,
        proxy_id: i64,
        success: bool,
        response_ms: f64,
        bytes: u64,
    ) -> Result<()> {
        let mut storage = self.lock()?;

        let Some(mut record) = storage
            .list_proxies(None)?
            .into_iter()
            .find(|p| p.id == proxy_id)
        else {
            return Ok(());
        };

        let outcome = if success { 1.0 } else { 0.0 };
        record.success_rate = EMA_ALPHA * record.success_rate + (1.0 - EMA_ALPHA) * outcome;
        record.average_response_ms =
            EMA_ALPHA * record.average_response_ms + (1.0 - EMA_ALPHA) * response_ms;
        record.bytes_used += bytes;

        if success {
            record.consecutive_failures = 0;
            if record.status == ProxyStatus::Testing {
                record.status = ProxyStatus::Active;
            }
        } else {
            record.failed_requests += 1;
            record.consecutive_failures += 1;
            if record.consecutive_failures >= self.config.blacklist_after_failures {
                tracing::warn!(
                    proxy_id,
                    failures = record.consecutive_failures,
                    "proxy blacklisted"
                );
                record.status = ProxyStatus::Blacklisted;
            }
        }

        if record.over_limits() {
            record.status = ProxyStatus::Exhausted;
        }

        storage.update_proxy_stats(&record)?;
        Ok(())
    }
}

/// Tier preference order for one selection attempt
fn tier_order(prefer_paid: bool, fallback_to_free: bool) -> Vec<ProxyTier> {
    if prefer_paid {
        let mut tiers = vec![ProxyTier::Premium, ProxyTier::Standard];
        if fallback_to_free {
            tiers.push(ProxyTier::Free);
        }
        tiers
    } else {
        vec![ProxyTier::Free, ProxyTier::Standard, ProxyTier::Premium]
    }
}

/// Cost-effectiveness score: reliability per unit cost, discounted by latency
fn cost_effectiveness(record: &ProxyRecord) -> f64 {
    let value = record.success_rate / (record.cost_per_request + COST_EPSILON);
    value / (1.0 + record.average_response_ms / 1000.0)
}

fn pick_cost_effective(candidates: &[ProxyRecord]) -> Option<&ProxyRecord> {
    candidates.iter().max_by(|a, b| {
        cost_effectiveness(a)
            .partial_cmp(&cost_effectiveness(b))
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewProxy, ProxySettings, SqliteStorage, Storage};
    use std::sync::{Arc, Mutex};

    fn manager() -> TieredProxyManager {
        let storage: SharedStorage =
            Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        TieredProxyManager::new(storage, ProxyConfig::default())
    }

    fn add_proxy(
        manager: &TieredProxyManager,
        address: &str,
        tier: ProxyTier,
        cost: f64,
    ) -> i64 {
        let mut storage = manager.storage.lock().unwrap();
        storage
            .upsert_proxy(&NewProxy {
                address,
                port: 8080,
                tier,
                provider: "testprov",
                status: ProxyStatus::Active,
                username: None,
                password: None,
                cost_per_request: cost,
                daily_request_limit: None,
                bandwidth_limit_mb: None,
                country: None,
                expires_at: None,
            })
            .unwrap()
    }

    #[test]
    fn test_tier_order() {
        assert_eq!(
            tier_order(true, true),
            vec![ProxyTier::Premium, ProxyTier::Standard, ProxyTier::Free]
        );
        assert_eq!(
            tier_order(true, false),
            vec![ProxyTier::Premium, ProxyTier::Standard]
        );
        assert_eq!(
            tier_order(false, true),
            vec![ProxyTier::Free, ProxyTier::Standard, ProxyTier::Premium]
        );
    }

    #[test]
    fn test_prefers_premium_when_available() {
        let manager = manager();
        add_proxy(&manager, "10.0.0.1", ProxyTier::Free, 0.0);
        let premium = add_proxy(&manager, "10.0.0.2", ProxyTier::Premium, 0.002);

        let selected = manager.get_proxy().unwrap().unwrap();
        assert_eq!(selected.id, premium);
        assert_eq!(selected.tier, ProxyTier::Premium);
    }

    #[test]
    fn test_falls_back_to_free() {
        let manager = manager();
        let free = add_proxy(&manager, "10.0.0.1", ProxyTier::Free, 0.0);

        // prefer_paid is the default; only a free proxy exists
        let selected = manager.get_proxy().unwrap().unwrap();
        assert_eq!(selected.id, free);
        assert_eq!(selected.tier, ProxyTier::Free);
    }

    #[test]
    fn test_no_fallback_when_disabled() {
        let manager = manager();
        add_proxy(&manager, "10.0.0.1", ProxyTier::Free, 0.0);
        manager
            .storage
            .lock()
            .unwrap()
            .save_proxy_settings(&ProxySettings {
                fallback_to_free: false,
                ..Default::default()
            })
            .unwrap();

        assert!(manager.get_proxy().unwrap().is_none());
    }

    #[test]
    fn test_cost_effective_pick() {
        let manager = manager();
        // Same success rate; the cheaper proxy wins the re-rank
        let cheap = add_proxy(&manager, "10.0.0.1", ProxyTier::Premium, 0.001);
        add_proxy(&manager, "10.0.0.2", ProxyTier::Premium, 0.01);

        let selected = manager.get_proxy().unwrap().unwrap();
        assert_eq!(selected.id, cheap);
    }

    #[test]
    fn test_max_cost_ceiling() {
        let manager = manager();
        add_proxy(&manager, "10.0.0.1", ProxyTier::Premium, 0.05);
        let free = add_proxy(&manager, "10.0.0.2", ProxyTier::Free, 0.0);
        manager
            .storage
            .lock()
            .unwrap()
            .save_proxy_settings(&ProxySettings {
                max_cost_per_request: Some(0.01),
                ..Default::default()
            })
            .unwrap();

        let selected = manager.get_proxy().unwrap().unwrap();
        assert_eq!(selected.id, free);
    }

    #[test]
    fn test_selection_records_usage() {
        let manager = manager();
        let id = add_proxy(&manager, "10.0.0.1", ProxyTier::Free, 0.0);
        manager.get_proxy().unwrap().unwrap();

        let storage = manager.storage.lock().unwrap();
        let record = storage
            .list_proxies(None)
            .unwrap()
            .into_iter()
            .find(|p| p.id == id)
            .unwrap();
        assert_eq!(record.total_requests, 1);
        assert!(record.last_used.is_some());
    }

    #[test]
    fn test_record_result_blacklists_after_failures() {
        let manager = manager();
        let id = add_proxy(&manager, "10.0.0.1", ProxyTier::Free, 0.0);

        for _ in 0..manager.config.blacklist_after_failures {
            manager.record_result(id, false, 900.0, 0).unwrap();
        }

        let storage = manager.storage.lock().unwrap();
        let record = storage
            .list_proxies(None)
            .unwrap()
            .into_iter()
            .find(|p| p.id == id)
            .unwrap();
        assert_eq!(record.status, ProxyStatus::Blacklisted);
        assert!(record.success_rate < 1.0);
    }

    #[test]
    fn test_record_result_success_resets_failures() {
        let manager = manager();
        let id = add_proxy(&manager, "10.0.0.1", ProxyTier::Free, 0.0);

        manager.record_result(id, false, 500.0, 0).unwrap();
        manager.record_result(id, true, 200.0, 1024).unwrap();

        let storage = manager.storage.lock().unwrap();
        let record = storage
            .list_proxies(None)
            .unwrap()
            .into_iter()
            .find(|p| p.id == id)
            .unwrap();
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.bytes_used, 1024);
    }
}
