use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use resq_common::{DataStore, RedisStore, RedisStoreConfig};

mod commands;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(
        short,
        long,
        default_value = "redis://127.0.0.1:6379",
        env = "RESQ_REDIS_URL",
        help = "Redis URL to connect to."
    )]
    redis_url: String,

    #[arg(
        short,
        long,
        default_value = "resque",
        env = "RESQ_NAMESPACE",
        help = "Prefix of every key in Redis. Pass an empty string to disable."
    )]
    namespace: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connection details and overall counts.
    Info,
    /// List known queues with their sizes.
    Queues,
    /// Number of jobs waiting in a queue.
    Size { queue: String },
    /// Show jobs in a queue without removing them.
    Peek {
        queue: String,
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        start: i64,
        #[arg(short, long, default_value_t = 10)]
        count: usize,
    },
    /// Append an encoded job to a queue.
    Push { queue: String, payload: String },
    /// Remove and print the job at the head of a queue.
    Pop { queue: String },
    /// Delete a queue and all of its jobs.
    RemoveQueue { queue: String },
    /// Failure count and failed-queue registry.
    Failed {
        #[arg(long, help = "Delete every failure record.")]
        clear: bool,
    },
    /// Registered workers, their start time and current job.
    Workers,
    /// Every key in the store. Scans the whole keyspace.
    Keys,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resq_admin=info,resq_common=info".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = RedisStoreConfig::new(cli.redis_url).with_namespace(cli.namespace);
    let store = RedisStore::new(config).context("Failed to create Redis pool")?;
    let data_store = DataStore::new(store);

    info!("Connected to {}", data_store.identifier());

    if let Err(e) = commands::run(&data_store, cli.command).await {
        error!("{:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
