//! fleet — provision an H-Store cluster on EC2 and drive benchmarks.
//!
//! # Usage
//!
//! ```text
//! fleet --set site.partitions=8 start-cluster
//! fleet exec-benchmark tpcc --trace
//! fleet stop-cluster --terminate
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "fleet",
    about = "H-Store cluster provisioning and benchmarking on EC2",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file (default: ./fleet.toml when present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override a configuration value, e.g. `--set client.count=4`.
    #[arg(long = "set", value_name = "KEY=VALUE", global = true, value_parser = commands::parse_key_val)]
    overrides: Vec<(String, String)>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the host/site/partition/client counts for the configuration
    Plan {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Print the effective configuration as TOML
    Config,
    /// Reconcile the fleet and bootstrap the head and every client
    StartCluster,
    /// Stop every running cluster instance
    StopCluster {
        /// Terminate instead of stopping.
        #[arg(long)]
        terminate: bool,
    },
    /// Run one benchmark project on the running cluster
    ExecBenchmark {
        project: String,
        /// Configuration key to strip from the properties files (repeatable).
        #[arg(long = "remove", value_name = "KEY")]
        removals: Vec<String>,
        /// Ask the benchmark for JSON output.
        #[arg(long)]
        json: bool,
        /// Capture workload traces and copy the combined trace back.
        #[arg(long)]
        trace: bool,
        /// Refresh the source checkout before running.
        #[arg(long)]
        update: bool,
    },
    /// Run a suite of benchmark projects in order
    Benchmark {
        /// Project to run (repeatable; default: tpcc, tm1, airline, auctionmark).
        #[arg(short, long = "project")]
        projects: Vec<String>,
    },
    /// Write the properties files for a project without running it
    WriteConf {
        project: String,
        #[arg(long = "remove", value_name = "KEY")]
        removals: Vec<String>,
    },
    /// Print `uname -a` from every running instance
    GetEnv,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let config = commands::load_config(cli.config.as_deref(), &cli.overrides)?;

    match cli.command {
        Commands::Plan { format } => commands::plan::plan(&config, &format),
        Commands::Config => commands::plan::show_config(&config),
        Commands::StartCluster => commands::cluster::start(&config).await,
        Commands::StopCluster { terminate } => commands::cluster::stop(&config, terminate).await,
        Commands::GetEnv => commands::cluster::get_env(&config).await,
        Commands::ExecBenchmark {
            project,
            removals,
            json,
            trace,
            update,
        } => {
            let request = fleet_bench::BenchmarkRequest {
                project,
                removals,
                json,
                trace,
                update,
            };
            commands::bench::exec(&config, &request).await
        }
        Commands::Benchmark { projects } => commands::bench::suite(&config, &projects).await,
        Commands::WriteConf { project, removals } => {
            commands::bench::write_conf(&config, &project, &removals).await
        }
    }
}

/// Used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER))?;
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
