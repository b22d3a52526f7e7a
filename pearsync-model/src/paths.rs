//! Application path layout
//!
//! - `$XDG_CONFIG_HOME/pearsync/daemon.sock` (fallback `~/.config/pearsync/`)
//! - `$XDG_DATA_HOME/pearsync/stores/<first-16-hex-of-key>/store/`
//!   (fallback `~/.local/share/pearsync/`)

use crate::types::PubKey;
use std::path::PathBuf;

const APP_NAME: &str = "pearsync";

/// Resolved config/data roots for this process.
#[derive(Debug, Clone)]
pub struct AppPaths {
    config: PathBuf,
    data: PathBuf,
}

impl AppPaths {
    /// Resolve from the environment. `XDG_CONFIG_HOME`/`XDG_DATA_HOME`
    /// win; otherwise the XDG defaults under the home directory.
    pub fn from_env() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let config = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .filter(|p| p.is_absolute())
            .unwrap_or_else(|| home.join(".config"))
            .join(APP_NAME);
        let data = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .filter(|p| p.is_absolute())
            .unwrap_or_else(|| home.join(".local/share"))
            .join(APP_NAME);
        Self { config, data }
    }

    /// Explicit roots, for tests.
    pub fn new(config: impl Into<PathBuf>, data: impl Into<PathBuf>) -> Self {
        Self {
            config: config.into().join(APP_NAME),
            data: data.into().join(APP_NAME),
        }
    }

    /// Config directory (`…/pearsync`).
    pub fn config_dir(&self) -> &PathBuf {
        &self.config
    }

    /// The daemon's Unix socket path.
    pub fn socket_path(&self) -> PathBuf {
        self.config.join("daemon.sock")
    }

    /// Per-workspace store root, keyed by the first 16 hex characters of
    /// the workspace key.
    pub fn store_dir(&self, workspace: &PubKey) -> PathBuf {
        let prefix = hex::encode(&workspace.as_bytes()[..8]);
        self.data.join("stores").join(prefix).join("store")
    }

    /// Ensure the config and data roots exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config)?;
        std::fs::create_dir_all(self.data.join("stores"))?;
        Ok(())
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::from_env()
    }
}
