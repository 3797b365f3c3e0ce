//! Tool status queries and the front-end's refresh cache

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::installers::{locate_installed, normalize_version, probe_installed_version, InstallEnv};
use crate::logging::log_warning;
use crate::platform::Tool;

/// Minimum spacing between two cache refreshes.
pub const REFRESH_THROTTLE: Duration = Duration::from_secs(5);

/// Local and upstream view of one tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolStatus {
    pub present: bool,
    pub installed_path: Option<PathBuf>,
    pub current_version: String,
    pub current_version_known: bool,
    pub latest_version: String,
    pub latest_version_known: bool,
    pub last_error: Option<String>,
}

impl ToolStatus {
    /// True only when both versions are known and the latest is newer.
    pub fn update_available(&self) -> bool {
        if !self.current_version_known || !self.latest_version_known {
            return false;
        }
        let current = normalize_version(&self.current_version);
        let latest = normalize_version(&self.latest_version);
        version_compare::compare_to(&latest, &current, version_compare::Cmp::Gt).unwrap_or(false)
    }
}

/// Probe the local binary and resolve the latest (or pinned) release.
/// Nothing on disk is changed.
pub fn status_for_tool(tool: Tool, env: &InstallEnv, cancel: &AtomicBool) -> ToolStatus {
    let mut status = ToolStatus::default();

    if let Some(path) = locate_installed(tool, env) {
        status.present = true;
        if let Some(version) = probe_installed_version(&path, env.probe_timeout) {
            status.current_version = version;
            status.current_version_known = true;
        }
        status.installed_path = Some(path);
    }

    match env.resolve(tool, cancel) {
        Ok(release) => {
            status.latest_version = normalize_version(&release.tag);
            status.latest_version_known = true;
        }
        Err(e) => {
            log_warning(&format!("Status check for {} failed: {}", tool, e));
            status.last_error = Some(e.to_string());
        }
    }

    status
}

// ============================================================================
// Status Cache
// ============================================================================

#[derive(Default)]
struct CacheInner {
    statuses: HashMap<Tool, ToolStatus>,
    last_refreshed: Option<Instant>,
    in_flight: bool,
}

/// Last known status per tool, refreshed on a background thread.
#[derive(Clone)]
pub struct StatusCache {
    inner: Arc<Mutex<CacheInner>>,
    throttle: Duration,
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCache {
    pub fn new() -> Self {
        Self::with_throttle(REFRESH_THROTTLE)
    }

    pub fn with_throttle(throttle: Duration) -> Self {
        Self {
            inner: Arc::default(),
            throttle,
        }
    }

    pub fn get(&self, tool: Tool) -> Option<ToolStatus> {
        self.inner.lock().statuses.get(&tool).cloned()
    }

    pub fn last_refreshed(&self) -> Option<Instant> {
        self.inner.lock().last_refreshed
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.lock().in_flight
    }

    /// Start a refresh of every tool unless one is running or the last one
    /// finished less than the throttle interval ago.
    pub fn spawn_refresh(&self, env: Arc<InstallEnv>, cancel: Arc<AtomicBool>) -> Option<JoinHandle<()>> {
        {
            let mut inner = self.inner.lock();
            if inner.in_flight {
                return None;
            }
            if inner.last_refreshed.is_some_and(|t| t.elapsed() < self.throttle) {
                return None;
            }
            inner.in_flight = true;
        }

        let shared = Arc::clone(&self.inner);
        Some(thread::spawn(move || {
            let fresh: HashMap<Tool, ToolStatus> = Tool::ALL
                .into_iter()
                .map(|tool| (tool, status_for_tool(tool, &env, &cancel)))
                .collect();

            let mut inner = shared.lock();
            inner.statuses.extend(fresh);
            inner.last_refreshed = Some(Instant::now());
            inner.in_flight = false;
        }))
    }
}
