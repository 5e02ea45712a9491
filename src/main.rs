//! Copy-trading replication engine for a prediction-market CLOB.
//!
//! Observes configured leader accounts and mirrors their trades from a
//! follower account, behind a battery of safety gates that are never
//! bypassed.

mod api;
mod config;
mod engine;
mod models;
mod store;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::DataClient;
use crate::config::Config;
use crate::engine::{Detector, ExecutorLoop, GuardedExecutor, LeaseManager, Reconciler};
use crate::store::Store;

/// Copy-trading engine CLI.
#[derive(Parser)]
#[command(name = "polymirror")]
#[command(about = "Mirror leader trades on a prediction-market CLOB", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the detector, executor, and reconciler loops
    Run {
        /// Evaluate every gate but never submit orders
        #[arg(long)]
        dry_run: bool,
    },

    /// Show record counts, stuck records, and records needing review
    Status,

    /// Run a single reconciliation pass and print discrepancies
    Reconcile,

    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut cfg = Config::from_env()?;
    let store = Store::open(&cfg.database_url).await?;

    match cli.command {
        Commands::Run { dry_run } => {
            cfg.dry_run = cfg.dry_run || dry_run;
            run(store, cfg).await?;
        }

        Commands::Status => {
            status(&store, &cfg).await?;
        }

        Commands::Reconcile => {
            let data = DataClient::new(&cfg.activity_host, &cfg.data_host)?;
            let reconciler = Reconciler::new(store, data, cfg);
            let result = reconciler.reconcile_once().await?;

            println!(
                "Checked {} tokens, {} clean, {} discrepancies",
                result.tokens_checked,
                result.tokens_clean,
                result.discrepancies.len()
            );
            for d in &result.discrepancies {
                println!(
                    "  [{}] {} expected {} actual {} (diff {})",
                    d.severity.as_str(),
                    d.token_id,
                    d.expected.round_dp(4),
                    d.actual.round_dp(4),
                    d.diff.round_dp(4)
                );
            }
        }

        Commands::Config => {
            print_config(&cfg);
        }
    }

    Ok(())
}

/// Wire up and run the three pipeline loops until ctrl-c.
async fn run(store: Store, cfg: Config) -> Result<()> {
    info!(
        leaders = cfg.leader_addresses.len(),
        dry_run = cfg.dry_run,
        fetch_interval = cfg.fetch_interval_secs,
        "Starting replication pipeline"
    );

    let lease = LeaseManager::new(store.clone(), cfg.lease_timeout_ms);
    info!(worker_id = %lease.worker_id(), "Worker identity assigned");

    let guard = GuardedExecutor::new(store.clone(), lease.clone(), &cfg)?;

    let detector = Detector::new(
        store.clone(),
        DataClient::new(&cfg.activity_host, &cfg.data_host)?,
        cfg.clone(),
    );
    let executor = ExecutorLoop::new(
        store.clone(),
        DataClient::new(&cfg.activity_host, &cfg.data_host)?,
        guard,
        lease.clone(),
        cfg.clone(),
    );
    let reconciler = Reconciler::new(
        store.clone(),
        DataClient::new(&cfg.activity_host, &cfg.data_host)?,
        cfg.clone(),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });
    }

    let detector_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { detector.run(shutdown).await })
    };
    let executor_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { executor.run(shutdown).await })
    };
    let reconciler_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { reconciler.run(shutdown).await })
    };

    let _ = tokio::join!(detector_task, executor_task, reconciler_task);

    // Clean exit: leases held by this worker are dropped rather than left
    // to expire.
    let released = lease.release_all().await?;
    info!(released, "Pipeline shut down");

    Ok(())
}

/// The admin-visible failure surface: terminal states, stuck records, and
/// records flagged for manual review.
async fn status(store: &Store, cfg: &Config) -> Result<()> {
    println!("\n=== Record states ===");
    for (state, count) in store.state_counts().await? {
        println!("{:<12} {:>8}", state, count);
    }

    let positions = store.positions_for(&cfg.proxy_wallet).await?;
    if !positions.is_empty() {
        println!("\n=== Follower positions (last snapshot) ===");
        for p in &positions {
            println!(
                "{:<20} {:>12.2} tokens  ${:>10.2}  {}",
                &p.token_id[..p.token_id.len().min(20)],
                p.size,
                p.value_decimal(),
                p.slug
            );
        }
    }

    let stuck = store.stuck_records(engine::lease::now_ms()).await?;
    if !stuck.is_empty() {
        println!("\n=== Stuck in executing (manual inspection required) ===");
        for record in &stuck {
            println!(
                "#{} {} {} {} key={}",
                record.id,
                record.leader_address,
                record.transaction_hash,
                record.side,
                record.idempotency_key.as_deref().unwrap_or("-")
            );
        }
    }

    let review = store.needs_review_records().await?;
    if !review.is_empty() {
        println!("\n=== Needs manual review ===");
        for record in &review {
            println!(
                "#{} {} {} intended={:.2} filled={:.2}",
                record.id,
                record.slug,
                record.side,
                record.intended_size.unwrap_or(0.0),
                record.filled_size.unwrap_or(0.0)
            );
        }
    }

    Ok(())
}

fn print_config(cfg: &Config) {
    println!("\n=== polymirror configuration ===\n");
    println!("Leaders:");
    for leader in &cfg.leader_addresses {
        println!("  {}", leader);
    }
    println!("Proxy wallet:        {}", cfg.proxy_wallet);
    println!("Database:            {}", cfg.database_url);
    println!("Chain id:            {}", cfg.chain_id);

    println!("\nCadence:");
    println!("  Fetch interval:    {}s", cfg.fetch_interval_secs);
    println!("  Executor interval: {}ms", cfg.executor_interval_ms);
    println!("  Reconcile every:   {}s", cfg.reconcile_interval_secs);
    println!("  Batch size:        {}", cfg.batch_size);

    println!("\nSafety:");
    println!("  Freshness window:  {}h", cfg.too_old_timestamp_hours);
    println!("  Retry limit:       {}", cfg.retry_limit);
    println!("  Max slippage:      {} bps", cfg.max_slippage_bps);
    println!("  Lease timeout:     {}ms", cfg.lease_timeout_ms);
    println!("  Dry run:           {}", cfg.dry_run);

    println!("\nViability:");
    println!("  Price limit:       {}", cfg.viability.price_limit);
    println!("  Min time to end:   {}min", cfg.viability.min_time_before_end_minutes);
    println!("  Max spread:        {} bps", cfg.viability.max_spread_bps);
    println!("  Min depth:         ${}", cfg.viability.min_depth_usd);

    println!("\nEdge filters:");
    println!("  Min delta:         ${}", cfg.edge.min_position_delta_usd);
    println!("  Sell needs pos.:   {}", cfg.edge.require_position_for_sell);
    println!("  Min trade pct:     {}%", cfg.edge.min_trade_percent_of_position);

    println!("\nSizing:");
    println!("  Mode:              {:?}", cfg.strategy.mode);
    println!("  Copy percent:      {}", cfg.strategy.copy_percent);
    println!("  Multiplier:        {}", cfg.strategy.multiplier);
    println!("  Tiers:             {}", cfg.strategy.tiers.len());
    println!("  Max order size:    ${}", cfg.strategy.max_order_size);
    println!("  Max pos. fraction: {}", cfg.strategy.max_position_fraction);
    println!("  Min order (USD):   ${}", cfg.strategy.min_order_size_usd);
    println!("  Min order (tok):   {}", cfg.strategy.min_order_size_tokens);
}
