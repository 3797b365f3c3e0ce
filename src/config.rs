use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checksum::VerifyPolicy;
use crate::error::InstallError;
use crate::github::DEFAULT_API_BASE;
use crate::http::Timeouts;
use crate::logging::log_warning;
use crate::retry::RetryPolicy;

// ============================================================================
// Main App Config
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Shared bin directory; `~/.local/bin` when unset
    pub bin_dir: Option<PathBuf>,
    /// Root of the per-tool versioned install trees
    pub install_root: Option<PathBuf>,
    pub api_base: String,
    pub api_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub sync_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_ms: u64,
    /// Tool id to release tag
    pub pins: HashMap<String, String>,
    /// Echo log lines to the terminal as well as the log file
    pub log_console: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bin_dir: None,
            install_root: None,
            api_base: DEFAULT_API_BASE.to_string(),
            api_timeout_secs: 30,
            download_timeout_secs: 600,
            probe_timeout_secs: 2,
            sync_timeout_secs: 480,
            retry_attempts: 4,
            retry_base_ms: 1000,
            pins: HashMap::new(),
            log_console: false,
        }
    }
}

impl AppConfig {
    fn get_path() -> PathBuf {
        kitup_path!("config.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::get_path())
    }

    /// Missing or unreadable files fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            if let Ok(content) = fs::read_to_string(path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => log_warning(&format!(
                        "Ignoring malformed {}: {}",
                        path.display(),
                        e
                    )),
                }
            }
        }
        Self::default()
    }

    pub fn save(&self) -> Result<(), InstallError> {
        self.save_to(&Self::get_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), InstallError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(InstallError::fs_at("create", parent))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| InstallError::Other {
            context: "Serialize config".to_string(),
            reason: e.to_string(),
        })?;
        fs::write(path, json).map_err(InstallError::fs_at("write", path))
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            api: Duration::from_secs(self.api_timeout_secs.max(1)),
            download: Duration::from_secs(self.download_timeout_secs.max(1)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_ms),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs.max(1))
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.bin_dir.clone().unwrap_or_else(crate::paths::default_bin_dir)
    }

    pub fn tools_root(&self) -> PathBuf {
        self.install_root
            .clone()
            .unwrap_or_else(crate::paths::default_tools_root)
    }
}

// ============================================================================
// Profile
// ============================================================================

pub const FEATURE_INSTALL_NEOVIM: &str = "install.neovim";
pub const FEATURE_INSTALL_RIPGREP: &str = "install.ripgrep";
pub const FEATURE_INSTALL_FD: &str = "install.fd";
pub const FEATURE_CONFIG_WRITE: &str = "config.write";
pub const FEATURE_PLUGIN_SYNC: &str = "config.plugin_sync";

pub const DEFAULT_SAFE_APP_NAME: &str = "nvim-kitup";

/// Where the editor configuration is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigTarget {
    /// The user's regular `nvim` config directory
    Default,
    /// A separate directory selected through `NVIM_APPNAME`
    Safe { app_name: String },
}

impl ConfigTarget {
    pub fn app_name(&self) -> &str {
        match self {
            ConfigTarget::Default => "nvim",
            ConfigTarget::Safe { app_name } => app_name,
        }
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, ConfigTarget::Safe { .. })
    }
}

/// The user's saved selection: enabled features plus a verification policy.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Profile {
    pub features: BTreeMap<String, bool>,
    pub verify: String,
    /// `default` or `safe`
    pub target: String,
    pub app_name: Option<String>,
    pub template_dir: Option<PathBuf>,
}

impl Default for Profile {
    fn default() -> Self {
        let features = [FEATURE_INSTALL_NEOVIM, FEATURE_INSTALL_RIPGREP, FEATURE_INSTALL_FD]
            .into_iter()
            .map(|k| (k.to_string(), true))
            .collect();
        Self {
            features,
            verify: "auto".to_string(),
            target: "default".to_string(),
            app_name: None,
            template_dir: None,
        }
    }
}

impl Profile {
    pub fn default_path() -> PathBuf {
        kitup_path!("profile.toml")
    }

    /// A missing file is the default profile; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, InstallError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(InstallError::fs_at("read", path))?;
        toml::from_str(&content).map_err(|e| InstallError::Other {
            context: format!("Parse profile {}", path.display()),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), InstallError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(InstallError::fs_at("create", parent))?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| InstallError::Other {
            context: "Serialize profile".to_string(),
            reason: e.to_string(),
        })?;
        fs::write(path, text).map_err(InstallError::fs_at("write", path))
    }

    pub fn enabled(&self, key: &str) -> bool {
        self.features.get(key).copied().unwrap_or(false)
    }

    pub fn set(&mut self, key: &str, on: bool) {
        self.features.insert(key.to_string(), on);
    }

    pub fn verify_policy(&self) -> VerifyPolicy {
        VerifyPolicy::parse_lenient(&self.verify)
    }

    pub fn config_target(&self) -> ConfigTarget {
        if self.target.trim().eq_ignore_ascii_case("safe") {
            ConfigTarget::Safe {
                app_name: self
                    .app_name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_SAFE_APP_NAME.to_string()),
            }
        } else {
            ConfigTarget::Default
        }
    }
}
