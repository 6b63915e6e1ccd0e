//! Configuration discovery and merging.
//!
//! The file (explicit `--config` or `$XDG_CONFIG_HOME/touchkey/config.toml`)
//! is parsed as a TOML table, then each `--config-toml` fragment is merged
//! over it in order. Tables merge key by key; any other value replaces the
//! previous one.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use touchkey_core::Config;
use touchkey_core::constants::DEFAULT_SOCKET_NAME;
use tracing::{debug, warn};

const APP_DIR: &str = "touchkey";
const CONFIG_FILE: &str = "config.toml";

/// Default configuration file location, if a config directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

/// Load, merge and validate the configuration.
///
/// An explicit `file` must exist; the default location is optional.
pub fn load(file: Option<&Path>, fragments: &[String]) -> Result<Config> {
    let mut table = match file {
        Some(path) => read_table(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => read_table(&path)?,
            _ => toml::Table::new(),
        },
    };

    for (index, fragment) in fragments.iter().enumerate() {
        let overlay: toml::Table = fragment
            .parse()
            .with_context(|| format!("invalid --config-toml fragment #{}", index + 1))?;
        merge(&mut table, overlay);
    }

    let config: Config = toml::Value::Table(table)
        .try_into()
        .context("invalid configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn read_table(path: &Path) -> Result<toml::Table> {
    debug!(path = %path.display(), "reading configuration");
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    text.parse()
        .with_context(|| format!("cannot parse config file {}", path.display()))
}

/// Merge `overlay` into `base`, recursing into tables present in both.
fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => match base.get_mut(&key) {
                Some(toml::Value::Table(existing)) => merge(existing, incoming),
                _ => {
                    base.insert(key, toml::Value::Table(incoming));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}

/// Default socket location inside the user runtime directory.
///
/// Falls back to the temporary directory when `XDG_RUNTIME_DIR` is unset.
pub fn default_socket_path() -> PathBuf {
    let dir = dirs::runtime_dir().unwrap_or_else(|| {
        warn!("XDG_RUNTIME_DIR is not set, using the temporary directory");
        std::env::temp_dir()
    });
    dir.join(DEFAULT_SOCKET_NAME)
}
