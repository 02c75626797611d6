//! CLI module for the rule chain engine
//!
//! Subcommands:
//! - `serve`: HTTP server
//! - `run`: execute one chain locally and print the result

pub mod run;
pub mod serve;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::infrastructure::logging;

/// Rule chain engine - ordered LLM text transformations
#[derive(Parser)]
#[command(name = "rulechain")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server
    Serve,

    /// Execute a chain against a text file
    Run(run::RunArgs),
}

/// Load `.env` and configuration, then install logging
fn bootstrap() -> anyhow::Result<AppConfig> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    Ok(config)
}
