//! Tool installation: resolve, download, verify, unpack and publish

mod pipeline;
mod publish;
mod version;

pub use pipeline::{install_tool, locate_binary, place_release, InstallOutcome};
pub use publish::{copy_executable, publish_binary};
pub use version::{installed_version, locate_installed, normalize_version, parse_version_output, probe_installed_version};

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::download::Downloader;
use crate::error::InstallError;
use crate::github::{Release, ReleaseResolver};
use crate::logging::log_warning;
use crate::platform::{Platform, Tool};

// ============================================================================
// Shared Types
// ============================================================================

/// Context for background installation tasks
#[derive(Clone)]
pub struct TaskContext {
    pub status_callback: Arc<dyn Fn(String) + Send + Sync>,
    pub log_callback: Arc<dyn Fn(String) + Send + Sync>,
    /// `(completed, total)` tasks
    pub progress_callback: Arc<dyn Fn(usize, usize) + Send + Sync>,
    pub cancel_flag: Arc<AtomicBool>,
}

impl TaskContext {
    pub fn new(
        status: impl Fn(String) + Send + Sync + 'static,
        log: impl Fn(String) + Send + Sync + 'static,
        progress: impl Fn(usize, usize) + Send + Sync + 'static,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            status_callback: Arc::new(status),
            log_callback: Arc::new(log),
            progress_callback: Arc::new(progress),
            cancel_flag: cancel,
        }
    }

    /// Context that discards everything; used by one-shot queries.
    pub fn silent(cancel: Arc<AtomicBool>) -> Self {
        Self::new(|_| {}, |_| {}, |_, _| {}, cancel)
    }

    pub fn set_status(&self, msg: String) {
        (self.status_callback)(msg);
    }

    pub fn log(&self, msg: String) {
        (self.log_callback)(msg);
    }

    pub fn set_progress(&self, completed: usize, total: usize) {
        (self.progress_callback)(completed, total);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    pub fn check_cancelled(&self) -> Result<(), InstallError> {
        if self.is_cancelled() {
            Err(InstallError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Install Environment
// ============================================================================

/// Services and locations shared by every tool install in a run.
pub struct InstallEnv {
    pub resolver: ReleaseResolver,
    pub downloader: Downloader,
    /// Shared directory published binaries land in
    pub bin_dir: PathBuf,
    /// Holds `<tool>/<tag>` version directories
    pub tools_root: PathBuf,
    pub platform: Platform,
    pub probe_timeout: Duration,
    /// Tags to install instead of the latest release
    pub pins: HashMap<Tool, String>,
    /// Search path for the up-to-date check; the process `PATH` when `None`
    pub search_path: Option<OsString>,
}

impl InstallEnv {
    pub fn from_config(config: &AppConfig) -> Self {
        let timeouts = config.timeouts();
        let retry = config.retry_policy();

        let mut pins = HashMap::new();
        for (id, tag) in &config.pins {
            match Tool::from_id(id) {
                Some(tool) if !tag.trim().is_empty() => {
                    pins.insert(tool, tag.trim().to_string());
                }
                Some(_) => {}
                None => log_warning(&format!("Ignoring pin for unknown tool '{}'", id)),
            }
        }

        Self {
            resolver: ReleaseResolver::new(&config.api_base, &timeouts, retry),
            downloader: Downloader::new(&timeouts, retry),
            bin_dir: config.bin_dir(),
            tools_root: config.tools_root(),
            platform: Platform::current(),
            probe_timeout: config.probe_timeout(),
            pins,
            search_path: None,
        }
    }

    pub fn tool_root(&self, tool: Tool) -> PathBuf {
        self.tools_root.join(tool.id())
    }

    pub fn pinned_tag(&self, tool: Tool) -> Option<&str> {
        self.pins.get(&tool).map(String::as_str)
    }

    /// The pinned release if there is a pin, otherwise the latest one.
    pub fn resolve(&self, tool: Tool, cancel: &AtomicBool) -> Result<Release, InstallError> {
        let (owner, repo) = tool.repo();
        match self.pinned_tag(tool) {
            Some(tag) => self.resolver.fetch_by_tag(owner, repo, tag, cancel),
            None => self.resolver.fetch_latest(owner, repo, cancel),
        }
    }
}
