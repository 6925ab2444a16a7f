mod check;
mod jobs;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use aggsched_config::{AggSchedConfig, LogConfig};

#[derive(Parser)]
#[command(name = "aggsched", about = "Cron-driven aggregation scheduler")]
struct Cli {
    /// Config file (defaults to ~/.aggsched/config.json5)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and its HTTP API
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List stored jobs
    Jobs,
    /// Show the next fire times of a cron expression
    Check {
        /// Cron expression, e.g. "*/5 * * * *" or "@hourly"
        expression: String,

        /// Number of fire times to show
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
    /// Check system health
    Health,
}

fn load(path: Option<&PathBuf>) -> anyhow::Result<AggSchedConfig> {
    let config = match path {
        Some(path) => aggsched_config::load_config_from(path)?,
        None => aggsched_config::load_config()?,
    };
    Ok(config)
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load(cli.config.as_ref())?;
    init_tracing(&config.log);

    match cli.command {
        Commands::Serve { port } => {
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting aggsched");
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(aggsched_gateway::start_gateway(config, port))?;
        }
        Commands::Jobs => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(jobs::run_jobs(&config))?;
        }
        Commands::Check { expression, count } => {
            check::run_check(&expression, count)?;
        }
        Commands::Health => {
            println!("aggsched is healthy");
            println!("  server: {}:{}", config.server.host, config.server.port);
            println!("  database: {}", config.sqlite.db_path()?.display());
            println!("  collector: {} {}", config.post_result.method, config.post_result.endpoint());
            println!("  reference date: {}", config.strategy.reference_date);
            println!("  metric tables: {}", config.metrics.metrics.len());
        }
    }

    Ok(())
}
