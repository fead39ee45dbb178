//! fairq CLI - Command line tool for inspecting and maintaining fair task queues

mod commands;

use clap::{Parser, Subcommand};
use commands::queue::PushArgs;
use fairq::config::{QueueConfig, DEFAULT_KEY_PREFIX};
use fairq::TaskQueue;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fairq")]
#[command(about = "fairq CLI - Inspect and maintain multi-tenant task queues", long_about = None)]
#[command(version)]
struct Cli {
    /// Redis connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Key prefix shared with the producers and workers
    #[arg(long, env = "FAIRQ_KEY_PREFIX", default_value = DEFAULT_KEY_PREFIX)]
    key_prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the number of pending tasks in a queue
    Size {
        /// Queue name
        queue: String,
    },
    /// List tenants in the active registry with their in-flight counts
    Tenants {
        /// Queue name
        queue: String,
    },
    /// Enqueue a task
    Push(PushArgs),
    /// Redeliver tasks whose processing deadline has passed
    Sweep {
        /// Queue names
        #[arg(required = true)]
        queues: Vec<String>,
        /// Keep sweeping every N seconds until Ctrl+C
        #[arg(long)]
        watch: Option<u64>,
    },
}

async fn connect(cli: &Cli) -> color_eyre::Result<TaskQueue> {
    let config = QueueConfig::default().with_key_prefix(cli.key_prefix.as_str());
    Ok(TaskQueue::connect_with(cli.redis_url.as_str(), config).await?)
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let queue = connect(&cli).await?;

    match cli.command {
        Commands::Size { queue: name } => commands::queue::size(&queue, &name).await?,
        Commands::Tenants { queue: name } => commands::queue::tenants(&queue, &name).await?,
        Commands::Push(args) => commands::queue::push(&queue, args).await?,
        Commands::Sweep { queues, watch } => commands::sweep::handle(queue, queues, watch).await?,
    }

    Ok(())
}
