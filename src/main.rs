//! CLI entry point: the operator-facing realization of switchover/failover
//! triggering that an admin HTTP API would otherwise provide.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mariadb_mon::config::MonitorConfig;
use mariadb_mon::monitor::{run_with_reload, Monitor};
use mariadb_mon::orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(name = "mariadb-mon", version)]
struct Cli {
    /// Path to the monitor's TOML configuration file.
    #[arg(short, long, default_value = "mariadb-mon.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the tick loop, reloading configuration on SIGHUP.
    Run {
        /// Run a single monitor pass, print the computed topology, and
        /// exit without entering the tick loop.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the JSON diagnostic export once, after a single tick.
    Status,

    /// Operator-triggered graceful role swap (old master stays alive).
    Switchover {
        #[arg(long)]
        demote: String,
        #[arg(long)]
        promote: String,
    },

    /// Promote a slave of a now-unreachable master.
    Failover {
        #[arg(long)]
        demote: String,
        #[arg(long)]
        promote: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> mariadb_mon::Result<()> {
    let config = MonitorConfig::from_file(&cli.config)?;
    let config_path = cli
        .config
        .to_str()
        .ok_or_else(|| mariadb_mon::Error::Config("config path is not valid UTF-8".into()))?
        .to_string();

    match cli.command {
        Commands::Run { dry_run: true } => {
            let monitor = Monitor::new(config);
            monitor.tick().await;
            println!("{}", serde_json::to_string_pretty(&monitor.to_json()).unwrap());
            Ok(())
        }
        Commands::Run { dry_run: false } => {
            let monitor = Arc::new(Monitor::new(config));
            run_with_reload(monitor, config_path).await;
            Ok(())
        }
        Commands::Status => {
            let monitor = Monitor::new(config);
            monitor.tick().await;
            println!("{}", serde_json::to_string_pretty(&monitor.to_json()).unwrap());
            Ok(())
        }
        Commands::Switchover { demote, promote } => {
            let monitor = Monitor::new(config);
            monitor.tick().await;
            let cfg = monitor.config();
            let orchestrator = Orchestrator::new(monitor.agents(), &cfg);
            orchestrator.switchover(&demote, &promote).await
        }
        Commands::Failover { demote, promote } => {
            let monitor = Monitor::new(config);
            monitor.tick().await;
            let cfg = monitor.config();
            let orchestrator = Orchestrator::new(monitor.agents(), &cfg);
            orchestrator.failover(&demote, &promote).await
        }
    }
}
