//! Writing the editor configuration from a template tree

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::config_backup::{back_up_dir, REASON_REPLACE_UNMANAGED};
use crate::config::ConfigTarget;
use crate::error::InstallError;
use crate::installers::TaskContext;
use crate::logging::{log_info, log_install};

/// Marker recording that kitup owns a config directory.
pub const MARKER_FILE: &str = ".kitup.json";
/// Init script used for headless plugin sync.
pub const HEADLESS_INIT: &str = "kitup_headless_init.lua";

const MANAGED_BY: &str = "kitup";

const HEADLESS_INIT_BODY: &str = "vim.g.kitup_headless = true\n\
local init = vim.fn.stdpath(\"config\") .. \"/init.lua\"\n\
if vim.fn.filereadable(init) == 1 then\n  dofile(init)\nend\n";

/// Produces the editor configuration for a target. The content itself is
/// outside this crate; implementations decide where it comes from.
pub trait ConfigWriter: Send + Sync {
    /// Write the configuration and return the directory it landed in.
    fn write(&self, target: &ConfigTarget, ctx: &TaskContext) -> Result<PathBuf, InstallError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConfigMarker {
    pub version: u32,
    pub managed_by: String,
    pub target: String,
    pub app_name: String,
    pub template: String,
    pub updated_at: String,
}

/// Read the marker in `dir`; `None` when absent or unreadable.
pub fn read_marker(dir: &Path) -> Option<ConfigMarker> {
    let content = fs::read_to_string(dir.join(MARKER_FILE)).ok()?;
    serde_json::from_str(&content).ok()
}

/// Copies a user-supplied template tree into the target's config directory.
pub struct TemplateConfigWriter {
    template_dir: PathBuf,
    /// Parent of per-app config directories (`$XDG_CONFIG_HOME` or `~/.config`)
    config_home: Option<PathBuf>,
    backups_dir: PathBuf,
}

impl TemplateConfigWriter {
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_dir: template_dir.into(),
            config_home: None,
            backups_dir: crate::paths::default_backups_dir(),
        }
    }

    pub fn with_backups_dir(mut self, backups_dir: impl Into<PathBuf>) -> Self {
        self.backups_dir = backups_dir.into();
        self
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    pub fn with_config_home(mut self, config_home: impl Into<PathBuf>) -> Self {
        self.config_home = Some(config_home.into());
        self
    }

    pub fn target_dir(&self, target: &ConfigTarget) -> PathBuf {
        match &self.config_home {
            Some(home) => home.join(target.app_name()),
            None => crate::paths::nvim_config_dir(target.app_name()),
        }
    }
}

impl ConfigWriter for TemplateConfigWriter {
    fn write(&self, target: &ConfigTarget, ctx: &TaskContext) -> Result<PathBuf, InstallError> {
        if !self.template_dir.is_dir() {
            return Err(InstallError::Other {
                context: "Write configuration".to_string(),
                reason: format!("template directory {} not found", self.template_dir.display()),
            });
        }

        let dest = self.target_dir(target);
        let managed = read_marker(&dest).is_some_and(|m| m.managed_by == MANAGED_BY);
        if !managed && has_entries(&dest) {
            let backup = back_up_dir(&dest, &self.backups_dir, target.app_name(), REASON_REPLACE_UNMANAGED)?;
            ctx.log(format!(
                "Moved existing configuration to {} (restore with `kitup restore {}`)",
                backup.path.display(),
                backup.id
            ));
        }
        fs::create_dir_all(&dest).map_err(InstallError::fs_at("create", &dest))?;

        let copied = copy_tree(&self.template_dir, &dest)?;
        log_install(&format!(
            "Copied {} files from {} to {}",
            copied,
            self.template_dir.display(),
            dest.display()
        ));

        let headless = dest.join(HEADLESS_INIT);
        fs::write(&headless, HEADLESS_INIT_BODY).map_err(InstallError::fs_at("write", &headless))?;

        let marker = ConfigMarker {
            version: 1,
            managed_by: MANAGED_BY.to_string(),
            target: if target.is_safe() { "safe" } else { "default" }.to_string(),
            app_name: target.app_name().to_string(),
            template: self.template_dir.display().to_string(),
            updated_at: Local::now().to_rfc3339(),
        };
        write_marker(&dest, &marker)?;

        ctx.log(format!("Wrote configuration to {}", dest.display()));
        log_info(&format!("Configuration written for {}", target.app_name()));
        Ok(dest)
    }
}

fn has_entries(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_some())
}

fn write_marker(dir: &Path, marker: &ConfigMarker) -> Result<(), InstallError> {
    let path = dir.join(MARKER_FILE);
    let mut json = serde_json::to_string_pretty(marker).map_err(|e| InstallError::Other {
        context: "Serialize marker".to_string(),
        reason: e.to_string(),
    })?;
    json.push('\n');
    fs::write(&path, json).map_err(InstallError::fs_at("write", &path))
}

/// Copy files and directories from `src` into `dest`, overwriting files. `.git` is skipped.
fn copy_tree(src: &Path, dest: &Path) -> Result<usize, InstallError> {
    let mut copied = 0;
    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| InstallError::Filesystem {
            context: format!("read template {}", src.display()),
            reason: e.to_string(),
        })?;
        let rel = entry.path().strip_prefix(src).map_err(|e| InstallError::Other {
            context: "Copy template".to_string(),
            reason: e.to_string(),
        })?;
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(InstallError::fs_at("create", &target))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(InstallError::fs_at("create", parent))?;
            }
            if fs::symlink_metadata(&target).is_ok_and(|m| m.file_type().is_symlink()) {
                fs::remove_file(&target).map_err(InstallError::fs_at("replace", &target))?;
            }
            fs::copy(entry.path(), &target).map_err(InstallError::fs_at("copy to", &target))?;
            copied += 1;
        }
    }
    Ok(copied)
}
