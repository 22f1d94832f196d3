//! Ferry - trace-driven opportunistic routing simulation
//!
//! Replays a contact trace against a network of store-and-forward routers
//! and prints a JSON report of delivery statistics and router state.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ferry_core::{Settings, SimTime};
use ferry_logging::{FerrySubscriberBuilder, LogConfig};
use ferry_routing::{NetworkConfig, RouterConfig, StrategyConfig, StrategyKind};
use ferry_simulation::{DEFAULT_RATE, SimConfig, Simulation, Trace};
use tracing::warn;

#[derive(Parser)]
#[command(
    name = "ferry-sim",
    about = "Trace-driven simulation of opportunistic store-and-forward routing",
    version
)]
struct Cli {
    /// Enable verbose, human-readable logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write JSONL logs to this directory instead of the console
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a trace and print the run report
    Run {
        #[command(flatten)]
        setup: Setup,

        /// Seconds between router updates
        #[arg(long, default_value_t = 1.0)]
        step: SimTime,

        /// Stop time in seconds (default: one step after the last event)
        #[arg(long)]
        end: Option<SimTime>,

        /// Rate of contacts without an explicit rate, in bytes per second
        #[arg(long, default_value_t = DEFAULT_RATE)]
        rate: f64,

        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a trace and settings without running them
    Check {
        #[command(flatten)]
        setup: Setup,
    },
}

#[derive(clap::Args)]
struct Setup {
    /// Contact and message trace
    #[arg(short, long)]
    trace: PathBuf,

    /// TOML settings file
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Settings namespace holding the router settings
    #[arg(long, default_value = "group")]
    group: String,

    /// Strategy to run, overriding the `router` setting
    #[arg(long)]
    router: Option<StrategyKind>,

    /// Number of hosts (default: as many as the trace mentions)
    #[arg(long)]
    hosts: Option<u32>,
}

impl Setup {
    fn load(&self) -> anyhow::Result<(Trace, NetworkConfig, u32)> {
        let trace = Trace::from_file(&self.trace)?;
        let settings = match &self.settings {
            Some(path) => Settings::from_file(path)?,
            None => Settings::new(),
        };

        let view = settings.namespace(&self.group);
        let kind = match (self.router, view.get_str("router")) {
            (Some(kind), _) => kind,
            (None, Some(raw)) => raw.parse().map_err(anyhow::Error::msg)?,
            (None, None) => StrategyKind::default(),
        };
        let config = NetworkConfig {
            router: RouterConfig::from_settings(&view)?,
            strategy: StrategyConfig::from_settings(&settings, kind)?,
        };

        let needed = trace.host_count();
        let hosts = self.hosts.unwrap_or(needed);
        anyhow::ensure!(
            hosts >= needed,
            "trace mentions {needed} hosts but only {hosts} were requested"
        );
        Ok((trace, config, hosts))
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = match (&cli.log_dir, cli.verbose) {
        (Some(dir), _) => LogConfig::simulation_run(dir.clone()),
        (None, true) => LogConfig::development(),
        (None, false) => LogConfig::default(),
    };
    let _guard = FerrySubscriberBuilder::new().with_config(log_config).init();

    match cli.command {
        Commands::Run {
            setup,
            step,
            end,
            rate,
            output,
        } => {
            let (trace, config, hosts) = setup.load()?;
            for warning in config.validate() {
                warn!(%warning, "Configuration warning");
            }

            let mut sim = Simulation::new(
                &config,
                hosts,
                SimConfig {
                    step,
                    end,
                    default_rate: rate,
                },
            );
            sim.run(&trace)?;

            let json = serde_json::to_string_pretty(&sim.report())?;
            match output {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("failed to write report to {}", path.display()))?,
                None => println!("{json}"),
            }
        }
        Commands::Check { setup } => {
            let (trace, config, hosts) = setup.load()?;
            println!("Trace: {} events over {}s", trace.len(), trace.end_time());
            println!("Hosts: {hosts}");
            println!("Strategy: {}", config.strategy.kind());
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration OK");
            }
            for warning in warnings {
                println!("Warning: {warning}");
            }
        }
    }

    Ok(())
}
