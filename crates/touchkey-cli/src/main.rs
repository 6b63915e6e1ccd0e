//! `touchkey`: tells local clients when a FIDO security key is waiting for
//! a touch.

mod cli;
mod config;
mod daemon;
mod notify;
mod watch;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};

const LOG_ENV: &str = "TOUCHKEY_LOG";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match Cli::parse().into_command() {
        Command::Run(args) => daemon::run(args).await,
        Command::Watch(args) => watch::run(args).await,
    }
}
