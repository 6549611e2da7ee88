//! goal-planner command-line interface
//!
//! Runs a single planner operation against the configured store and prints
//! the result (or a structured error) as JSON.

use anyhow::Result;
use clap::Parser;
use goal_planner::cli::{self, Cli};
use goal_planner::config::Config;
use goal_planner::logging::{self, LogTarget};
use goal_planner::service::Planner;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    logging::init(cli.verbose, &LogTarget::parse(&cli.log))?;

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load(path)?;
            config.apply_env();
            config
        }
        None => Config::load_or_default(),
    };

    // Override paths from CLI arguments
    if let Some(db_path) = &cli.database {
        config.store.db_path = PathBuf::from(db_path);
    }
    debug!(db_path = %config.store.db_path.display(), user = %cli.user, "Starting");

    let planner = Planner::from_config(&config)?;

    match cli::run(&planner, &cli.user, cli.command).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err.report())?);
            Ok(ExitCode::FAILURE)
        }
    }
}
