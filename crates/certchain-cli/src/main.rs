//! certchain CLI - store certificate keys on a private Ethereum-style chain.
//!
//! Deploys the storage contract, stores and retrieves keys through it, and
//! runs the on-demand mining controller.

mod commands;
mod config;
mod output;
mod telemetry;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;

async fn run() -> anyhow::Result<()> {
    let cli = commands::Cli::parse();

    let mut config = config::CliConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config, std::env::var(commands::PASSPHRASE_ENV).ok());
    config.validate().context("invalid configuration")?;

    telemetry::init_telemetry(&config.log_level, config.json_logs)?;

    commands::execute(cli.command, config).await
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}
