//! Command line definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use touchkey_core::SocketSource;

#[derive(Debug, Parser)]
#[command(name = "touchkey", version, about, disable_help_subcommand = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// The subcommand to run; `run` when none was given.
    pub fn into_command(self) -> Command {
        self.command
            .unwrap_or_else(|| Command::Run(RunArgs::default()))
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch security keys and serve the touch state (default)
    Run(RunArgs),

    /// Connect to a running daemon and print every state it sends
    Watch(WatchArgs),
}

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Socket path, or `@activation` to use an inherited socket
    #[arg(long, value_name = "PATH")]
    pub socket: Option<SocketSource>,

    /// Configuration file (default: $XDG_CONFIG_HOME/touchkey/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration fragment applied on top of the file; later ones win
    #[arg(long = "config-toml", value_name = "TOML")]
    pub config_toml: Vec<String>,
}

#[derive(Debug, Default, Args)]
pub struct WatchArgs {
    /// Socket path (default: $XDG_RUNTIME_DIR/touchkey.socket)
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,
}
