//! The `watch` subcommand.

use anyhow::{Context, Result};
use touchkey_network::{ClientError, PresenceClient, PresenceClientConfig};
use tracing::info;

use crate::cli::WatchArgs;
use crate::config::default_socket_path;

/// Print every state the daemon sends until it closes the connection.
pub async fn run(args: WatchArgs) -> Result<()> {
    let socket_path = args.socket.unwrap_or_else(default_socket_path);
    let mut client = PresenceClient::new(PresenceClientConfig {
        socket_path: socket_path.clone(),
        ..Default::default()
    });
    client
        .connect()
        .await
        .with_context(|| format!("cannot connect to {}", socket_path.display()))?;

    loop {
        match client.recv().await {
            Ok(state) => println!("{}", String::from_utf8_lossy(state.wire_line()).trim_end()),
            Err(ClientError::ConnectionLost(_)) => {
                info!("daemon closed the connection");
                return Ok(());
            }
            Err(e) => return Err(e).context("cannot read from daemon"),
        }
    }
}
