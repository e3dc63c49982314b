//! Persisted settings: display name, save directory, ports, and the
//! inbound-transfer concurrency cap. Stored as TOML next to the user's
//! config; every field has a usable default so a missing or partial
//! file never blocks startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::protocol::{DEFAULT_MAX_TRANSFERS, DISCOVERY_PORT, TRANSFER_PORT};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Name shown to peers in discovery responses.
    pub display_name: String,
    /// Where received files and folders land.
    pub save_dir: PathBuf,
    pub transfer_port: u16,
    pub discovery_port: u16,
    /// Admission limit for concurrent inbound transfer handlers.
    pub max_concurrent_transfers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            save_dir: PathBuf::from("received"),
            transfer_port: TRANSFER_PORT,
            discovery_port: DISCOVERY_PORT,
            max_concurrent_transfers: DEFAULT_MAX_TRANSFERS,
        }
    }
}

fn default_display_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "lanbeam".to_string())
}

impl Settings {
    /// Load from a TOML file; a missing file yields defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read settings {}", path.display()))?;
        let mut settings: Settings =
            toml::from_str(&text).with_context(|| format!("parse settings {}", path.display()))?;
        if settings.max_concurrent_transfers == 0 {
            settings.max_concurrent_transfers = DEFAULT_MAX_TRANSFERS;
        }
        Ok(settings)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let text = toml::to_string_pretty(self).context("serialize settings")?;
        std::fs::write(path, text).with_context(|| format!("write settings {}", path.display()))
    }
}
