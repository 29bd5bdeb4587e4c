use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokenmeter_config::{find_config_path, load_config, resolve_dir};
use tokenmeter_core::{
    ActivityFilter, Lifecycle, PriceTable, TrendGranularity, UsageRecord, UsageStore,
};

#[derive(Parser)]
#[command(name = "tokenmeter", about = "Usage telemetry store for an API proxy", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the storage directory from the config
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append one usage record
    Record {
        #[arg(long)]
        model: String,
        #[arg(long, default_value_t = 0)]
        input: u64,
        #[arg(long, default_value_t = 0)]
        output: u64,
        /// Total tokens; defaults to input + output, saturating
        #[arg(long)]
        total: Option<u64>,
        /// Mark the request as failed
        #[arg(long)]
        failure: bool,
        #[arg(long, default_value = "cli")]
        source: String,
        #[arg(long, default_value = "")]
        api_key: String,
        #[arg(long, default_value_t = 0)]
        duration_ms: u64,
        /// Explicit cost in USD; priced from config when omitted
        #[arg(long)]
        cost: Option<f64>,
    },
    /// Show recent activity, newest first
    Recent {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        #[arg(short, long, default_value_t = 0)]
        offset: usize,
        /// Exact model name
        #[arg(short, long, default_value = "")]
        model: String,
        /// "success" or "failure"
        #[arg(short, long, default_value = "")]
        status: String,
    },
    /// Show hourly or daily trend buckets
    Trends {
        /// "hour" or "day"
        #[arg(short, long, default_value = "day")]
        granularity: String,
        #[arg(short, long, default_value_t = 30)]
        limit: usize,
    },
    /// Show all-time totals
    Stats,
    /// Show per-model totals
    Models,
    /// Show 24h, 7d and all-time cost
    Costs,
}

fn main() -> Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(find_config_path);
    let config = load_config(&config_path)?;
    tracing::debug!("Loaded config from {}", config_path.display());

    let data_dir = cli
        .data_dir
        .unwrap_or_else(|| resolve_dir(&config.storage.dir));
    let lifecycle = Lifecycle::new(Arc::new(PriceTable::new(config.pricing.clone())))
        .with_file_name(config.storage.file_name.clone());
    let store = lifecycle.initialize(&data_dir)?;
    for warning in store.startup_warnings() {
        eprintln!("warning: {warning}");
    }

    let result = run_command(cli.command, &store);
    lifecycle.shutdown();
    result
}

fn run_command(command: Commands, store: &UsageStore) -> Result<()> {
    match command {
        Commands::Record {
            model,
            input,
            output,
            total,
            failure,
            source,
            api_key,
            duration_ms,
            cost,
        } => {
            let mut rec =
                UsageRecord::new(&model, input, output, total_tokens(input, output, total));
            rec.is_failure = failure;
            rec.source = source;
            rec.api_key = api_key;
            rec.duration_ms = duration_ms;
            rec.cost_usd = cost.unwrap_or(0.0);
            let id = store.append(&rec)?;
            print_json(&serde_json::json!({ "id": id }))
        }
        Commands::Recent {
            limit,
            offset,
            model,
            status,
        } => {
            let filter = ActivityFilter::from_params(&model, &status);
            print_json(&store.recent_activity(limit, offset, &filter)?)
        }
        Commands::Trends { granularity, limit } => print_json(
            &store.usage_trends(TrendGranularity::from_str(&granularity), limit)?,
        ),
        Commands::Stats => print_json(&store.global_stats()?),
        Commands::Models => print_json(&store.per_model_stats()?),
        Commands::Costs => print_json(&store.period_costs()?),
    }
}

/// An explicit total is kept as given; otherwise input + output, saturating.
fn total_tokens(input: u64, output: u64, total: Option<u64>) -> u64 {
    total.unwrap_or(input.saturating_add(output))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
