//! The `run` subcommand: wire hotplug, readers and the socket together.

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use touchkey_core::Config;
use touchkey_hardware::hid::HidBackend;
use touchkey_hardware::{AnyBackend, DeviceManager, HotplugMonitor, ManagerConfig};
use touchkey_network::{BroadcastServer, ServerConfig};
use touchkey_state::StateBus;
use tracing::{error, info, warn};

use crate::cli::RunArgs;
use crate::config::{self, default_socket_path};
use crate::notify::Notifier;

const HOTPLUG_CAPACITY: usize = 64;
const DEVICE_CHANGE_CAPACITY: usize = 64;

/// Resolve the configuration for `args`, with `--socket` taking precedence.
pub fn resolve_config(args: &RunArgs) -> Result<Config> {
    let mut config = config::load(args.config.as_deref(), &args.config_toml)?;
    if let Some(socket) = &args.socket {
        config.socket.path = Some(socket.clone());
    }
    Ok(config)
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    tracing::trace!(?config, "loaded config");

    let bus = StateBus::new();

    let server_config = ServerConfig::from_socket_config(&config.socket, default_socket_path());
    let server = BroadcastServer::bind(server_config, bus.clone())
        .context("cannot open listening socket")?;

    let backend = HidBackend::new().context("cannot initialise hidapi")?;
    let mut manager = DeviceManager::new(
        AnyBackend::Hid(backend),
        ManagerConfig::from(&config),
        bus.clone(),
    );

    let notifier = if config.notify.enable {
        info!("starting notify output");
        let (tx, rx) = mpsc::channel(DEVICE_CHANGE_CAPACITY);
        manager = manager.with_device_changes(tx);
        Some(tokio::spawn(Notifier::new(config.clone()).run(rx)))
    } else {
        None
    };

    let (hotplug_tx, hotplug_rx) = mpsc::channel(HOTPLUG_CAPACITY);
    let manager = manager.start(hotplug_rx);

    let monitor = match HotplugMonitor::start(hotplug_tx).await {
        Ok(monitor) => monitor,
        Err(e) => {
            if let Err(shutdown) = manager.shutdown().await {
                warn!(error = %shutdown, "device manager did not stop cleanly");
            }
            return Err(e).context("cannot subscribe to hotplug events");
        }
    };

    let mut terminate =
        signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;
    let shutdown = async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "cannot listen for SIGINT");
                }
                info!("received SIGINT");
            }
            _ = terminate.recv() => info!("received SIGTERM"),
        }
    };

    info!(version = touchkey_core::VERSION, "touchkey running");
    let served = server.run(shutdown).await;

    drop(monitor);
    if let Err(e) = manager.shutdown().await {
        warn!(error = %e, "device manager did not stop cleanly");
    }
    if let Some(notifier) = notifier
        && let Err(e) = notifier.await
    {
        warn!(error = %e, "notifier task failed");
    }

    served.context("socket server failed")?;
    info!("touchkey stopped");
    Ok(())
}
