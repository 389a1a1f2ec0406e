//! Free proxy harvesting and validation
//!
//! Public free-proxy lists are fetched, parsed into host:port candidates and
//! probed against an IP-echo endpoint before anything reaches the pool. Only
//! candidates that answer the probe are stored.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::ProxyConfig;
use crate::queue::SharedStorage;
use crate::state::{ProxyStatus, ProxyTier};
use crate::storage::{NewProxy, Storage, StorageError};
use crate::Result;

/// Concurrent source fetches
const SOURCE_FETCH_LIMIT: usize = 3;

/// Concurrent validation probes
const PROBE_LIMIT: usize = 20;

/// Provider label for harvested free proxies
const FREE_PROVIDER: &str = "free-list";

static HOST_PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*((?:\d{1,3}\.){3}\d{1,3}):(\d{2,5})\s*$").unwrap());

/// Parses a proxy-list body into host:port pairs
///
/// Lists in the wild mix plain `ip:port` lines with comments, HTML and
/// blank lines. Anything that does not match is dropped.
fn parse_proxy_lines(body: &str) -> Vec<(String, u16)> {
    HOST_PORT_RE
        .captures_iter(body)
        .filter_map(|caps| {
            let host = caps.get(1)?.as_str().to_string();
            let port: u16 = caps.get(2)?.as_str().parse().ok()?;
            if port == 0 {
                return None;
            }
            Some((host, port))
        })
        .collect()
}

/// Fetches all configured sources and returns deduplicated candidates
async fn harvest_candidates(config: &ProxyConfig) -> Vec<(String, u16)> {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(config.validation_timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(error = %err, "failed to build harvest client");
            return Vec::new();
        }
    };

    let semaphore = Arc::new(Semaphore::new(SOURCE_FETCH_LIMIT));
    let mut tasks = JoinSet::new();

    for source in config.free_sources.clone() {
        let client = client.clone();
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire().await;
            match client.get(&source).send().await {
                Ok(response) => match response.text().await {
                    Ok(body) => {
                        let parsed = parse_proxy_lines(&body);
                        tracing::debug!(source, count = parsed.len(), "source fetched");
                        parsed
                    }
                    Err(err) => {
                        tracing::warn!(source, error = %err, "source body unreadable");
                        Vec::new()
                    }
                },
                Err(err) => {
                    tracing::warn!(source, error = %err, "source fetch failed");
                    Vec::new()
                }
            }
        });
    }

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Ok(parsed) = joined {
            for candidate in parsed {
                if seen.insert(candidate.clone()) {
                    candidates.push(candidate);
                }
            }
        }
    }
    candidates
}

/// Probes one candidate through the validation endpoint
async fn probe(
    host: String,
    port: u16,
    validation_url: String,
    timeout: Duration,
) -> Option<(String, u16)> {
    let proxy = reqwest::Proxy::all(format!("http://{host}:{port}")).ok()?;
    let client = reqwest::Client::builder()
        .proxy(proxy)
        .timeout(timeout)
        .build()
        .ok()?;

    let response = client.get(&validation_url).send().await.ok()?;
    if response.status().is_success() {
        Some((host, port))
    } else {
        None
    }
}

/// Probes candidates concurrently, keeping those that answer
async fn validate_candidates(
    candidates: Vec<(String, u16)>,
    config: &ProxyConfig,
) -> Vec<(String, u16)> {
    let timeout = Duration::from_secs(config.validation_timeout_secs);
    let semaphore = Arc::new(Semaphore::new(PROBE_LIMIT));
    let mut tasks = JoinSet::new();

    for (host, port) in candidates {
        let validation_url = config.validation_url.clone();
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire().await;
            probe(host, port, validation_url, timeout).await
        });
    }

    let mut passing = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Ok(Some(candidate)) = joined {
            passing.push(candidate);
        }
    }
    passing
}

/// Refreshes the free tier: harvest, validate, store survivors
///
/// Returns the number of proxies written. Existing rows for the same
/// address and port are left untouched by the upsert.
pub async fn update_free_pool(storage: SharedStorage, config: &ProxyConfig) -> Result<u32> {
    let candidates = harvest_candidates(config).await;
    tracing::info!(count = candidates.len(), "free proxy candidates harvested");

    let passing = validate_candidates(candidates, config).await;
    tracing::info!(count = passing.len(), "candidates passed validation");

    let mut stored = 0;
    {
        let mut storage = storage
            .lock()
            .map_err(|_| StorageError::Database("storage lock poisoned".to_string()))?;
        for (host, port) in &passing {
            storage.upsert_proxy(&NewProxy {
                address: host,
                port: *port,
                tier: ProxyTier::Free,
                provider: FREE_PROVIDER,
                status: ProxyStatus::Active,
                username: None,
                password: None,
                cost_per_request: 0.0,
                daily_request_limit: None,
                bandwidth_limit_mb: None,
                country: None,
                expires_at: None,
            })?;
            stored += 1;
        }
    }
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_proxy_lines() {
        let body = "# scraped list\n1.2.3.4:8080\nnot a proxy\n10.0.0.1:3128\n\n5.6.7.8:99999\n";
        let parsed = parse_proxy_lines(body);
        assert_eq!(
            parsed,
            vec![
                ("1.2.3.4".to_string(), 8080),
                ("10.0.0.1".to_string(), 3128),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_embedded_markup() {
        let body = "<td>1.2.3.4:8080</td>\n 9.9.9.9:1080 \n";
        let parsed = parse_proxy_lines(body);
        assert_eq!(parsed, vec![("9.9.9.9".to_string(), 1080)]);
    }

    #[tokio::test]
    async fn test_harvest_candidates_dedupes_across_sources() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1.2.3.4:8080\n5.6.7.8:80\n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1.2.3.4:8080\n"))
            .mount(&server)
            .await;

        let config = ProxyConfig {
            free_sources: vec![
                format!("{}/a.txt", server.uri()),
                format!("{}/b.txt", server.uri()),
            ],
            ..Default::default()
        };

        let mut candidates = harvest_candidates(&config).await;
        candidates.sort();
        assert_eq!(
            candidates,
            vec![
                ("1.2.3.4".to_string(), 8080),
                ("5.6.7.8".to_string(), 80),
            ]
        );
    }

    #[tokio::test]
    async fn test_harvest_survives_failing_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/good.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1.2.3.4:8080\n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bad.txt"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = ProxyConfig {
            free_sources: vec![
                format!("{}/good.txt", server.uri()),
                format!("{}/bad.txt", server.uri()),
            ],
            ..Default::default()
        };

        let candidates = harvest_candidates(&config).await;
        assert_eq!(candidates, vec![("1.2.3.4".to_string(), 8080)]);
    }

    #[tokio::test]
    async fn test_update_free_pool_stores_nothing_without_survivors() {
        // No sources configured, so harvest yields nothing
        let storage: SharedStorage = Arc::new(Mutex::new(
            crate::storage::SqliteStorage::new_in_memory().unwrap(),
        ));
        let config = ProxyConfig {
            free_sources: Vec::new(),
            ..Default::default()
        };

        let stored = update_free_pool(Arc::clone(&storage), &config).await.unwrap();
        assert_eq!(stored, 0);
        assert!(storage.lock().unwrap().list_proxies(None).unwrap().is_empty());
    }
}
