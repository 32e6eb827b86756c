//! Alarm Service (AlarmSrv)
//!
//! Command-line front end: scenario replay plus lookup and formula checks.

use alarmsrv::logging::init_logging;
use alarmsrv::{AlarmConfig, AlarmService, FixedTimeProvider, Scenario};
use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use voltage_formula::{Context, FormulaEngine};
use voltage_lookup::Lookup;

#[derive(Parser)]
#[command(name = "alarmsrv")]
#[command(about = "Alarm evaluation and notification service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: config/alarmsrv.yaml)
    #[arg(short, long, global = true, env = "ALARMSRV_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario file against an in-memory backend
    Replay {
        /// Scenario YAML file
        path: PathBuf,
    },

    /// Validate a lookup expression
    CheckLookup {
        /// Lookup expression, e.g. "Q(var_type='food') & Q(value__lt=5)"
        expr: String,
    },

    /// Evaluate a formula against a JSON context
    Eval {
        /// Formula template, e.g. "{{ var.value }} < 5"
        formula: String,

        /// Context as a JSON object
        #[arg(long, default_value = "{}")]
        context: String,
    },

    /// Print the default configuration as YAML
    DefaultConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay { path } => {
            let config = match &cli.config {
                Some(path) => AlarmConfig::load_from(path)?,
                None => AlarmConfig::load()?,
            };
            init_logging(&config.logging)?;
            replay(config, &path)
        },
        Commands::CheckLookup { expr } => {
            let config = load_quiet(cli.config.as_deref());
            match Lookup::parse_with_limit(&expr, config.engine.lookup_max_len) {
                Ok(lookup) => {
                    println!("{} {}", "VALID".bright_green(), lookup.as_str());
                    Ok(())
                },
                Err(e) => {
                    println!("{} {}", "INVALID".red(), e);
                    std::process::exit(1);
                },
            }
        },
        Commands::Eval { formula, context } => {
            let context: Context =
                serde_json::from_str(&context).context("context must be a JSON object")?;
            let result = FormulaEngine::new().evaluate(&formula, &context)?;
            let shown = if result {
                "true".bright_green()
            } else {
                "false".yellow()
            };
            println!("{}", shown);
            Ok(())
        },
        Commands::DefaultConfig => {
            print!("{}", AlarmConfig::generate_default_config());
            Ok(())
        },
    }
}

/// Config for the offline checks; a broken file falls back to the defaults
fn load_quiet(path: Option<&std::path::Path>) -> AlarmConfig {
    let loaded = match path {
        Some(path) => AlarmConfig::load_from(path),
        None => AlarmConfig::load(),
    };
    loaded.unwrap_or_default()
}

fn replay(config: AlarmConfig, path: &std::path::Path) -> Result<()> {
    let scenario = Scenario::load(path)
        .with_context(|| format!("failed to load scenario {}", path.display()))?;

    let clock = Arc::new(FixedTimeProvider::new(chrono::Utc::now()));
    let (service, backend) = AlarmService::in_memory(config, clock.clone());
    info!(path = %path.display(), steps = scenario.steps.len(), "Replaying scenario");

    let outcome = scenario.run(&service, &backend, &clock)?;
    print!("{}", serde_yaml::to_string(&outcome)?);
    Ok(())
}
