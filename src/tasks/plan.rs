//! Turning a profile into an ordered task list

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use super::config_write::ConfigWriter;
use super::sync::sync_plugins;
use super::Task;
use crate::config::{Profile, FEATURE_CONFIG_WRITE, FEATURE_PLUGIN_SYNC};
use crate::env_path::ensure_dir_in_path;
use crate::error::InstallError;
use crate::installers::{install_tool, locate_installed, InstallEnv};
use crate::logging::log_info;
use crate::platform::Tool;

const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(8 * 60);

pub struct Planner {
    env: Arc<InstallEnv>,
    writer: Arc<dyn ConfigWriter>,
    sync_timeout: Duration,
}

impl Planner {
    pub fn new(env: Arc<InstallEnv>, writer: Arc<dyn ConfigWriter>) -> Self {
        Self {
            env,
            writer,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Build the task list for `profile`. Order is fixed: bin directory,
    /// Neovim, ripgrep, fd, configuration, plugin sync. Disabled features
    /// contribute no task.
    pub fn plan(&self, profile: &Profile) -> Vec<Task> {
        let mut tasks = Vec::new();
        let policy = profile.verify_policy();
        let target = profile.config_target();

        let tools: Vec<Tool> = Tool::ALL
            .into_iter()
            .filter(|t| profile.enabled(t.feature_key()))
            .collect();

        if !tools.is_empty() {
            let env = Arc::clone(&self.env);
            tasks.push(Task::new("Ensure bin directory", move |ctx, _| {
                fs::create_dir_all(&env.bin_dir).map_err(InstallError::fs_at("create", &env.bin_dir))?;
                if ensure_dir_in_path(&env.bin_dir) {
                    ctx.log(format!("Added {} to PATH for this session", env.bin_dir.display()));
                }
                Ok(())
            }));
        }

        for tool in tools {
            let env = Arc::clone(&self.env);
            tasks.push(Task::new(format!("Install {}", tool.display_name()), move |ctx, state| {
                let outcome = install_tool(tool, policy, &env, ctx)?;
                state.installed.insert(tool, outcome.path);
                Ok(())
            }));
        }

        let write = profile.enabled(FEATURE_CONFIG_WRITE);
        if write {
            let writer = Arc::clone(&self.writer);
            let target = target.clone();
            tasks.push(Task::new("Write editor configuration", move |ctx, state| {
                let dir = writer.write(&target, ctx)?;
                state.config_dir = Some(dir);
                Ok(())
            }));
        }

        if write && profile.enabled(FEATURE_PLUGIN_SYNC) {
            let env = Arc::clone(&self.env);
            let timeout = self.sync_timeout;
            tasks.push(Task::new("Sync plugins", move |ctx, state| {
                let nvim = state
                    .installed
                    .get(&Tool::Neovim)
                    .cloned()
                    .or_else(|| locate_installed(Tool::Neovim, &env))
                    .ok_or_else(|| InstallError::BinaryNotFound {
                        name: Tool::Neovim.binary().to_string(),
                        root: "PATH".to_string(),
                    })?;
                let config_dir = state.config_dir.clone().ok_or_else(|| InstallError::Other {
                    context: "Plugin sync".to_string(),
                    reason: "configuration has not been written".to_string(),
                })?;
                sync_plugins(&nvim, &config_dir, &target, timeout, ctx)
            }));
        }

        log_info(&format!(
            "Planned {} tasks: {}",
            tasks.len(),
            tasks.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")
        ));
        tasks
    }
}

/// Plan with the default plugin sync limit.
pub fn plan(profile: &Profile, env: Arc<InstallEnv>, writer: Arc<dyn ConfigWriter>) -> Vec<Task> {
    Planner::new(env, writer).plan(profile)
}
