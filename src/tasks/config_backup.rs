//! Backups of editor configurations kitup replaces

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::InstallError;
use crate::logging::{log_install, log_warning};

/// Metadata file written next to each saved tree.
pub const BACKUP_META_FILE: &str = "meta.json";
const SAVED_TREE: &str = "config";

/// Why a backup was taken.
pub const REASON_REPLACE_UNMANAGED: &str = "replace-unmanaged";
pub const REASON_PRE_RESTORE: &str = "pre-restore";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackupMeta {
    pub id: String,
    pub created_at: String,
    /// Directory the tree was moved out of
    pub source: String,
    pub reason: String,
}

/// One entry under the backups directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigBackup {
    pub id: String,
    pub path: PathBuf,
    /// `None` when `meta.json` is missing or unreadable
    pub meta: Option<BackupMeta>,
}

impl ConfigBackup {
    /// The saved tree, or the backup directory itself if it has no `config/` inside.
    pub fn config_dir(&self) -> PathBuf {
        let saved = self.path.join(SAVED_TREE);
        if saved.is_dir() {
            saved
        } else {
            self.path.clone()
        }
    }

    fn created_at(&self) -> &str {
        self.meta.as_ref().map(|m| m.created_at.as_str()).unwrap_or("")
    }
}

/// Move all of `dir` to `<root>/<label>-<ts>/config` and record where it came from.
pub fn back_up_dir(dir: &Path, root: &Path, label: &str, reason: &str) -> Result<ConfigBackup, InstallError> {
    fs::create_dir_all(root).map_err(InstallError::fs_at("create", root))?;

    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let mut id = format!("{}-{}", label, stamp);
    let mut n = 2;
    while root.join(&id).exists() {
        id = format!("{}-{}-{}", label, stamp, n);
        n += 1;
    }

    let path = root.join(&id);
    fs::create_dir_all(&path).map_err(InstallError::fs_at("create", &path))?;
    move_dir(dir, &path.join(SAVED_TREE))?;

    let meta = BackupMeta {
        id: id.clone(),
        created_at: Local::now().to_rfc3339(),
        source: dir.display().to_string(),
        reason: reason.to_string(),
    };
    if let Err(e) = write_meta(&path, &meta) {
        log_warning(&format!("Backup {} has no metadata: {}", id, e));
    }

    log_install(&format!("Moved {} to {}", dir.display(), path.display()));
    Ok(ConfigBackup {
        id,
        path,
        meta: Some(meta),
    })
}

/// Every backup under `root`, newest first. A missing `root` is an empty list.
pub fn list_backups(root: &Path) -> Result<Vec<ConfigBackup>, InstallError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(InstallError::fs_at("read", root)(e)),
    };

    let mut backups: Vec<ConfigBackup> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| {
            let path = e.path();
            let meta = read_meta(&path);
            let id = meta
                .as_ref()
                .map(|m| m.id.clone())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| e.file_name().to_string_lossy().into_owned());
            ConfigBackup { id, path, meta }
        })
        .collect();

    backups.sort_by(|a, b| {
        b.created_at()
            .cmp(a.created_at())
            .then_with(|| b.id.cmp(&a.id))
    });
    Ok(backups)
}

/// Copy backup `id` back to `dest`.
///
/// Whatever is at `dest` is backed up first (reason `pre-restore`), so a
/// restore can itself be undone. The restored backup stays in place.
pub fn restore_backup(root: &Path, id: &str, dest: &Path, log: &dyn Fn(&str)) -> Result<(), InstallError> {
    if id.is_empty() || id.contains('/') || id == "." || id == ".." {
        return Err(InstallError::Other {
            context: "Restore backup".to_string(),
            reason: format!("invalid backup id '{}'", id),
        });
    }

    let backup = list_backups(root)?
        .into_iter()
        .find(|b| b.id == id || b.path.file_name().is_some_and(|n| n == id))
        .ok_or_else(|| InstallError::Other {
            context: "Restore backup".to_string(),
            reason: format!("no backup named '{}' in {}", id, root.display()),
        })?;
    let source = backup.config_dir();

    if fs::symlink_metadata(dest).is_ok() {
        let label = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());
        let saved = back_up_dir(dest, root, &label, REASON_PRE_RESTORE)?;
        log(&format!("Saved current configuration to {}", saved.path.display()));
    }

    fs::create_dir_all(dest).map_err(InstallError::fs_at("create", dest))?;
    copy_dir_all(&source, dest)?;
    log(&format!("Restored {} from {}", dest.display(), backup.path.display()));
    Ok(())
}

fn read_meta(dir: &Path) -> Option<BackupMeta> {
    let content = fs::read_to_string(dir.join(BACKUP_META_FILE)).ok()?;
    serde_json::from_str(&content).ok()
}

fn write_meta(dir: &Path, meta: &BackupMeta) -> Result<(), InstallError> {
    let path = dir.join(BACKUP_META_FILE);
    let mut json = serde_json::to_string_pretty(meta).map_err(|e| InstallError::Other {
        context: "Serialize backup metadata".to_string(),
        reason: e.to_string(),
    })?;
    json.push('\n');
    fs::write(&path, json).map_err(InstallError::fs_at("write", &path))
}

/// Rename, or copy then delete when the rename crosses filesystems.
fn move_dir(src: &Path, dst: &Path) -> Result<(), InstallError> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    copy_dir_all(src, dst)?;
    fs::remove_dir_all(src).map_err(InstallError::fs_at("remove", src))
}

/// Copy a whole tree, symlinks included, merging into `dst`.
fn copy_dir_all(src: &Path, dst: &Path) -> Result<(), InstallError> {
    fs::create_dir_all(dst).map_err(InstallError::fs_at("create", dst))?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| InstallError::Filesystem {
            context: format!("read {}", src.display()),
            reason: e.to_string(),
        })?;
        let rel = entry.path().strip_prefix(src).map_err(|e| InstallError::Other {
            context: "Copy tree".to_string(),
            reason: e.to_string(),
        })?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(InstallError::fs_at("create", &target))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(InstallError::fs_at("read link", entry.path()))?;
            if fs::symlink_metadata(&target).is_ok() {
                fs::remove_file(&target).map_err(InstallError::fs_at("replace", &target))?;
            }
            std::os::unix::fs::symlink(&link, &target).map_err(InstallError::fs_at("link", &target))?;
        } else {
            if fs::symlink_metadata(&target).is_ok_and(|m| m.file_type().is_symlink()) {
                fs::remove_file(&target).map_err(InstallError::fs_at("replace", &target))?;
            }
            fs::copy(entry.path(), &target).map_err(InstallError::fs_at("copy to", &target))?;
        }
    }
    Ok(())
}
