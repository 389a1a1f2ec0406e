//! Trolley command-line interface
//!
//! Subcommands: `crawl` to run crawl sessions, `status` for the latest
//! session and queue counts, and the `proxy` family for pool management.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use trolley::config::{load_config, Config};
use trolley::crawler::CrawlRunner;
use trolley::events::tracing_sink;
use trolley::proxy::{update_free_pool, TieredProxyManager};
use trolley::queue::{CrawlQueue, SharedStorage, StorageGuard};
use trolley::state::{CrawlType, ProxyStatus, ProxyTier, QueueType};
use trolley::storage::{open_storage, NewProxy, ProxyRecord, Storage};

/// Trolley: a grocery-site crawl orchestrator
#[derive(Parser, Debug)]
#[command(name = "trolley")]
#[command(version)]
#[command(about = "Grocery catalogue crawler with a durable work queue", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a crawl session
    Crawl {
        /// Which stage to run
        #[arg(long, value_enum, default_value = "all")]
        stage: Stage,

        /// Cancel an already-running session instead of refusing to start
        #[arg(long)]
        force: bool,
    },

    /// Show the latest session and queue counts
    Status,

    /// Manage the proxy pool
    Proxy {
        #[command(subcommand)]
        command: ProxyCommand,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Stage {
    Category,
    ProductList,
    ProductDetail,
    All,
}

impl From<Stage> for CrawlType {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Category => CrawlType::Category,
            Stage::ProductList => CrawlType::ProductList,
            Stage::ProductDetail => CrawlType::ProductDetail,
            Stage::All => CrawlType::Both,
        }
    }
}

#[derive(Subcommand, Debug)]
enum ProxyCommand {
    /// List proxies
    List {
        /// Restrict to one tier
        #[arg(long, value_enum)]
        tier: Option<TierArg>,

        #[arg(long, value_enum, default_value = "table")]
        format: Format,
    },

    /// Import paid proxies from a file (lines: host:port or host:port:user:pass)
    AddPaid {
        #[arg(long)]
        provider: String,

        #[arg(long, value_enum)]
        tier: TierArg,

        #[arg(long)]
        file: PathBuf,

        /// Cost per request in account currency
        #[arg(long, default_value_t = 0.0)]
        cost: f64,
    },

    /// Harvest and validate free proxies now
    UpdateFree,

    /// Live-probe active proxies and record the outcomes
    Test {
        /// How many proxies to probe
        #[arg(long, default_value_t = 10)]
        test_count: u32,
    },

    /// Pool health summary
    Stats {
        #[arg(long, value_enum, default_value = "table")]
        format: Format,
    },

    /// Accrued cost per provider
    Costs {
        #[arg(long, value_enum, default_value = "table")]
        format: Format,
    },

    /// Persist proxy selection settings
    Configure {
        #[arg(long)]
        min_success_rate: Option<f64>,

        #[arg(long)]
        max_cost: Option<f64>,

        #[arg(long)]
        prefer_paid: Option<bool>,

        #[arg(long)]
        fallback_to_free: Option<bool>,
    },

    /// Usage and cost totals for one provider
    Balance {
        #[arg(long)]
        provider: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TierArg {
    Premium,
    Standard,
    Free,
}

impl From<TierArg> for ProxyTier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Premium => ProxyTier::Premium,
            TierArg::Standard => ProxyTier::Standard,
            TierArg::Free => ProxyTier::Free,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Table,
    Json,
    Summary,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let config = load_config(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let storage = open_storage(Path::new(&config.output.database_path))
        .with_context(|| format!("opening database at {}", config.output.database_path))?;
    let storage: SharedStorage = Arc::new(Mutex::new(storage));

    match cli.command {
        Command::Crawl { stage, force } => handle_crawl(storage, config, stage, force).await,
        Command::Status => handle_status(&storage),
        Command::Proxy { command } => handle_proxy(storage, &config, command).await,
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("trolley=info,warn"),
            1 => EnvFilter::new("trolley=debug,info"),
            2 => EnvFilter::new("trolley=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn lock(storage: &SharedStorage) -> anyhow::Result<StorageGuard<'_>> {
    storage
        .lock()
        .map_err(|_| anyhow::anyhow!("storage lock poisoned"))
}

async fn handle_crawl(
    storage: SharedStorage,
    config: Config,
    stage: Stage,
    force: bool,
) -> anyhow::Result<()> {
    let runner = CrawlRunner::new(Arc::clone(&storage), config, tracing_sink());
    let report = runner.run(stage.into(), force).await?;
    println!(
        "Session {} {}: {} processed, {} failed",
        report.session_id, report.status, report.processed_items, report.failed_items
    );
    Ok(())
}

fn handle_status(storage: &SharedStorage) -> anyhow::Result<()> {
    let guard = lock(storage)?;

    match guard.get_latest_session()? {
        Some(session) => {
            println!("Session {} ({})", session.id, session.crawl_type);
            println!("  Status:    {}", session.status);
            println!(
                "  Started:   {}",
                session.started_at.as_deref().unwrap_or("-")
            );
            println!(
                "  Completed: {}",
                session.completed_at.as_deref().unwrap_or("-")
            );
            println!("  Processed: {}", session.processed_items);
            println!("  Failed:    {}", session.failed_items);
            if !session.error_log.is_empty() {
                let lines = session.error_log.lines().count();
                println!("  Error log: {lines} entries");
            }
        }
        None => println!("No crawl sessions yet"),
    }
    drop(guard);

    println!("\nQueues (pending/processing/completed/failed):");
    for queue_type in QueueType::all_types() {
        let queue = CrawlQueue::new(Arc::clone(storage), queue_type);
        let stats = queue.stats()?;
        println!(
            "  {:<15} {}/{}/{}/{}",
            queue_type.to_string(),
            stats.pending,
            stats.processing,
            stats.completed,
            stats.failed
        );
    }
    Ok(())
}

async fn handle_proxy(
    storage: SharedStorage,
    config: &Config,
    command: ProxyCommand,
) -> anyhow::Result<()> {
    match command {
        ProxyCommand::List { tier, format } => {
            let proxies = lock(&storage)?.list_proxies(tier.map(Into::into))?;
            print_proxies(&proxies, format);
            Ok(())
        }
        ProxyCommand::AddPaid {
            provider,
            tier,
            file,
            cost,
        } => handle_add_paid(&storage, &provider, tier.into(), &file, cost),
        ProxyCommand::UpdateFree => {
            let stored = update_free_pool(Arc::clone(&storage), &config.proxy).await?;
            println!("{stored} free proxies stored");
            Ok(())
        }
        ProxyCommand::Test { test_count } => {
            handle_proxy_test(storage, config, test_count).await
        }
        ProxyCommand::Stats { format } => {
            let proxies = lock(&storage)?.list_proxies(None)?;
            print_proxy_stats(&proxies, format);
            Ok(())
        }
        ProxyCommand::Costs { format } => {
            let costs = lock(&storage)?.provider_costs()?;
            match format {
                Format::Json => {
                    let rows: Vec<_> = costs
                        .iter()
                        .map(|c| {
                            serde_json::json!({
                                "provider": c.provider,
                                "proxies": c.proxy_count,
                                "requests": c.total_requests,
                                "total_cost": c.total_cost,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
                Format::Table | Format::Summary => {
                    println!(
                        "{:<20} {:>8} {:>10} {:>12}",
                        "PROVIDER", "PROXIES", "REQUESTS", "TOTAL COST"
                    );
                    for c in &costs {
                        println!(
                            "{:<20} {:>8} {:>10} {:>12.4}",
                            c.provider, c.proxy_count, c.total_requests, c.total_cost
                        );
                    }
                }
            }
            Ok(())
        }
        ProxyCommand::Configure {
            min_success_rate,
            max_cost,
            prefer_paid,
            fallback_to_free,
        } => {
            let mut guard = lock(&storage)?;
            let mut settings = guard.get_proxy_settings()?;
            if let Some(rate) = min_success_rate {
                settings.min_success_rate = rate;
            }
            if let Some(cost) = max_cost {
                settings.max_cost_per_request = Some(cost);
            }
            if let Some(prefer) = prefer_paid {
                settings.prefer_paid = prefer;
            }
            if let Some(fallback) = fallback_to_free {
                settings.fallback_to_free = fallback;
            }
            guard.save_proxy_settings(&settings)?;
            println!(
                "prefer-paid={} fallback-to-free={} min-success-rate={} max-cost={}",
                settings.prefer_paid,
                settings.fallback_to_free,
                settings.min_success_rate,
                settings
                    .max_cost_per_request
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
            Ok(())
        }
        ProxyCommand::Balance { provider } => {
            let costs = lock(&storage)?.provider_costs()?;
            match costs.iter().find(|c| c.provider == provider) {
                Some(c) => println!(
                    "{}: {} proxies, {} requests, {:.4} total cost",
                    c.provider, c.proxy_count, c.total_requests, c.total_cost
                ),
                None => println!("No usage recorded for provider {provider}"),
            }
            Ok(())
        }
    }
}

/// Parses one import line: host:port with optional :user:pass
fn parse_proxy_line(line: &str) -> Option<(String, u16, Option<String>, Option<String>)> {
    let parts: Vec<&str> = line.trim().split(':').collect();
    match parts.as_slice() {
        [host, port] => Some(((*host).to_string(), port.parse().ok()?, None, None)),
        [host, port, user, pass] => Some((
            (*host).to_string(),
            port.parse().ok()?,
            Some((*user).to_string()),
            Some((*pass).to_string()),
        )),
        _ => None,
    }
}

fn handle_add_paid(
    storage: &SharedStorage,
    provider: &str,
    tier: ProxyTier,
    file: &Path,
    cost: f64,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading proxy file {}", file.display()))?;

    let mut imported = 0;
    let mut skipped = 0;
    {
        let mut guard = lock(storage)?;
        for line in content.lines() {
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let Some((host, port, username, password)) = parse_proxy_line(line) else {
                tracing::warn!(line, "unparsable proxy line skipped");
                skipped += 1;
                continue;
            };
            guard.upsert_proxy(&NewProxy {
                address: &host,
                port,
                tier,
                provider,
                status: ProxyStatus::Active,
                username: username.as_deref(),
                password: password.as_deref(),
                cost_per_request: cost,
                daily_request_limit: None,
                bandwidth_limit_mb: None,
                country: None,
                expires_at: None,
            })?;
            imported += 1;
        }
    }
    println!("{imported} proxies imported ({skipped} lines skipped)");
    Ok(())
}

async fn handle_proxy_test(
    storage: SharedStorage,
    config: &Config,
    test_count: u32,
) -> anyhow::Result<()> {
    let candidates: Vec<ProxyRecord> = lock(&storage)?
        .list_proxies(None)?
        .into_iter()
        .filter(|p| p.status == ProxyStatus::Active || p.status == ProxyStatus::Testing)
        .take(test_count as usize)
        .collect();

    if candidates.is_empty() {
        println!("No active proxies to test");
        return Ok(());
    }

    let manager = TieredProxyManager::new(Arc::clone(&storage), config.proxy.clone());
    let timeout = Duration::from_secs(config.proxy.validation_timeout_secs);
    let mut passed = 0;

    for proxy in &candidates {
        let started = Instant::now();
        let ok = probe_proxy(&proxy.connection_url(), &config.proxy.validation_url, timeout).await;
        let elapsed_ms = started.elapsed().as_millis() as f64;
        manager.record_result(proxy.id, ok, elapsed_ms, 0)?;

        let verdict = if ok { "ok" } else { "FAILED" };
        println!(
            "{}:{} [{}] {:>7.0}ms {}",
            proxy.address, proxy.port, proxy.tier, elapsed_ms, verdict
        );
        if ok {
            passed += 1;
        }
    }
    println!("{passed}/{} proxies passed", candidates.len());
    Ok(())
}

async fn probe_proxy(connection_url: &str, validation_url: &str, timeout: Duration) -> bool {
    let Ok(proxy) = reqwest::Proxy::all(connection_url) else {
        return false;
    };
    let Ok(client) = reqwest::Client::builder().proxy(proxy).timeout(timeout).build() else {
        return false;
    };
    match client.get(validation_url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

fn print_proxies(proxies: &[ProxyRecord], format: Format) {
    match format {
        Format::Json => {
            let rows: Vec<_> = proxies
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "id": p.id,
                        "address": p.address,
                        "port": p.port,
                        "tier": p.tier.to_db_string(),
                        "provider": p.provider,
                        "status": p.status.to_db_string(),
                        "success_rate": p.success_rate,
                        "average_response_ms": p.average_response_ms,
                        "total_requests": p.total_requests,
                        "total_cost": p.total_cost,
                    })
                })
                .collect();
            match serde_json::to_string_pretty(&rows) {
                Ok(json) => println!("{json}"),
                Err(error) => eprintln!("serialization failed: {error}"),
            }
        }
        Format::Table => {
            println!(
                "{:<22} {:<9} {:<14} {:<12} {:>8} {:>9} {:>9}",
                "ADDRESS", "TIER", "PROVIDER", "STATUS", "RATE", "AVG MS", "REQUESTS"
            );
            for p in proxies {
                println!(
                    "{:<22} {:<9} {:<14} {:<12} {:>7.0}% {:>9.0} {:>9}",
                    format!("{}:{}", p.address, p.port),
                    p.tier.to_db_string(),
                    p.provider,
                    p.status.to_db_string(),
                    p.success_rate * 100.0,
                    p.average_response_ms,
                    p.total_requests
                );
            }
        }
        Format::Summary => {
            println!("{} proxies", proxies.len());
        }
    }
}

fn print_proxy_stats(proxies: &[ProxyRecord], format: Format) {
    let mut by_tier: Vec<(ProxyTier, u64, u64, f64)> = Vec::new();
    for tier in [ProxyTier::Premium, ProxyTier::Standard, ProxyTier::Free] {
        let of_tier: Vec<_> = proxies.iter().filter(|p| p.tier == tier).collect();
        if of_tier.is_empty() {
            continue;
        }
        let active = of_tier
            .iter()
            .filter(|p| p.status == ProxyStatus::Active)
            .count() as u64;
        let rate_sum: f64 = of_tier.iter().map(|p| p.success_rate).sum();
        by_tier.push((
            tier,
            of_tier.len() as u64,
            active,
            rate_sum / of_tier.len() as f64,
        ));
    }

    match format {
        Format::Json => {
            let rows: Vec<_> = by_tier
                .iter()
                .map(|(tier, total, active, rate)| {
                    serde_json::json!({
                        "tier": tier.to_db_string(),
                        "total": total,
                        "active": active,
                        "avg_success_rate": rate,
                    })
                })
                .collect();
            match serde_json::to_string_pretty(&rows) {
                Ok(json) => println!("{json}"),
                Err(error) => eprintln!("serialization failed: {error}"),
            }
        }
        Format::Table => {
            println!(
                "{:<10} {:>6} {:>7} {:>10}",
                "TIER", "TOTAL", "ACTIVE", "AVG RATE"
            );
            for (tier, total, active, rate) in &by_tier {
                println!(
                    "{:<10} {:>6} {:>7} {:>9.0}%",
                    tier.to_string(),
                    total,
                    active,
                    rate * 100.0
                );
            }
        }
        Format::Summary => {
            let active = proxies
                .iter()
                .filter(|p| p.status == ProxyStatus::Active)
                .count();
            println!("{} proxies, {} active", proxies.len(), active);
        }
    }
}
