use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::{tdlog_debug, Error, Result};

/// Default quiet window for coalescing bursts of filesystem events.
pub const DEFAULT_COALESCE_MS: u64 = 200;

/// Default interval for the self-healing full rescan.
pub const DEFAULT_RESCAN_SECS: u64 = 300;

/// Configuration for a single task vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Vault name, used to scope task ids and subscriptions.
    pub name: String,
    /// Root directory of the vault.
    pub path: PathBuf,
    /// Subfolder of the vault root that holds task files.
    pub tasks_folder: String,
    /// Launcher command for this vault; falls back to the global launcher.
    pub launcher: Option<String>,
    /// Default project directory for sessions when a task has none.
    pub project_path: Option<PathBuf>,
    /// Folders scanned for blocker statuses; defaults to the tasks folder.
    pub status_folders: Option<Vec<String>>,
}

impl VaultConfig {
    /// Absolute path of the tasks folder.
    pub fn tasks_dir(&self) -> PathBuf {
        self.path.join(&self.tasks_folder)
    }

    /// Directories scanned when building the status cache.
    pub fn status_dirs(&self) -> Vec<PathBuf> {
        match &self.status_folders {
            Some(folders) => folders.iter().map(|f| self.path.join(f)).collect(),
            None => vec![self.tasks_dir()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub vaults: Vec<VaultConfig>,
    /// Global launcher command, overridable per vault.
    pub launcher: Option<String>,
    #[serde(default = "default_coalesce_ms")]
    pub coalesce_ms: u64,
    #[serde(default = "default_rescan_secs")]
    pub rescan_interval_secs: u64,
}

fn default_coalesce_ms() -> u64 {
    DEFAULT_COALESCE_MS
}

fn default_rescan_secs() -> u64 {
    DEFAULT_RESCAN_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vaults: Vec::new(),
            launcher: None,
            coalesce_ms: DEFAULT_COALESCE_MS,
            rescan_interval_secs: DEFAULT_RESCAN_SECS,
        }
    }
}

impl Config {
    pub fn deck_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".taskdeck"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::deck_dir()?.join("taskdeck.toml"))
    }

    pub fn effective_launcher(&self, vault: &VaultConfig) -> String {
        vault
            .launcher
            .as_deref()
            .or(self.launcher.as_deref())
            .unwrap_or("claude")
            .to_string()
    }

    pub fn get_vault(&self, name: &str) -> Option<&VaultConfig> {
        self.vaults.iter().find(|v| v.name == name)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        tdlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            tdlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        tdlog_debug!(
            "Config loaded: {} vault(s), launcher={:?}, coalesce_ms={}",
            config.vaults.len(),
            config.launcher,
            config.coalesce_ms
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let deck_dir = Self::deck_dir()?;
        if !deck_dir.exists() {
            fs::create_dir_all(&deck_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        tdlog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}
