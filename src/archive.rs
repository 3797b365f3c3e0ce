//! `.tar.gz` extraction that refuses to write outside its destination

use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};

use crate::error::InstallError;
use crate::logging::log_warning;

/// Unpack `archive` into `dest` and return the first path segment seen
/// (normally the archive's single top-level directory).
///
/// Any entry that is absolute or climbs out of `dest` aborts the whole
/// extraction before that entry is written.
pub fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<String, InstallError> {
    let label = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| archive.display().to_string());
    let bad = |reason: String| InstallError::Extraction {
        archive: label.clone(),
        reason,
    };

    let file = File::open(archive).map_err(InstallError::fs_at("open", archive))?;
    fs::create_dir_all(dest).map_err(InstallError::fs_at("create", dest))?;
    let root = dest.canonicalize().map_err(InstallError::fs_at("resolve", dest))?;

    let mut tar = Archive::new(GzDecoder::new(file));
    let entries = tar.entries().map_err(|e| bad(e.to_string()))?;

    let mut top: Option<String> = None;
    let mut seen_any = false;

    for entry in entries {
        let mut entry = entry.map_err(|e| bad(e.to_string()))?;
        seen_any = true;

        let raw = entry.path().map_err(|e| bad(e.to_string()))?.into_owned();
        let rel = match clean_entry_path(&raw) {
            Ok(Some(rel)) => rel,
            Ok(None) => continue,
            Err(reason) => return Err(bad(format!("{}: {}", reason, raw.display()))),
        };

        if top.is_none() {
            top = rel
                .components()
                .next()
                .map(|c| c.as_os_str().to_string_lossy().into_owned());
        }

        let target = root.join(&rel);
        let mode = entry.header().mode().unwrap_or(0o644) & 0o7777;

        match entry.header().entry_type() {
            EntryType::Directory => {
                prepare_parent(&root, &target).map_err(bad)?;
                fs::create_dir_all(&target).map_err(InstallError::fs_at("create", &target))?;
                check_inside(&root, &target).map_err(bad)?;
                fs::set_permissions(&target, fs::Permissions::from_mode(mode | 0o700))
                    .map_err(InstallError::fs_at("chmod", &target))?;
            }
            EntryType::Regular | EntryType::Continuous => {
                prepare_parent(&root, &target).map_err(bad)?;
                remove_existing(&target).map_err(InstallError::fs_at("replace", &target))?;
                let mut out = File::create(&target).map_err(InstallError::fs_at("create", &target))?;
                io::copy(&mut entry, &mut out).map_err(|e| bad(e.to_string()))?;
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))
                    .map_err(InstallError::fs_at("chmod", &target))?;
            }
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .map_err(|e| bad(e.to_string()))?
                    .ok_or_else(|| bad(format!("symlink without target: {}", raw.display())))?
                    .into_owned();
                prepare_parent(&root, &target).map_err(bad)?;
                remove_existing(&target).map_err(InstallError::fs_at("replace", &target))?;
                std::os::unix::fs::symlink(&link, &target)
                    .map_err(InstallError::fs_at("link", &target))?;
            }
            EntryType::Link => {
                let link = entry
                    .link_name()
                    .map_err(|e| bad(e.to_string()))?
                    .ok_or_else(|| bad(format!("hard link without target: {}", raw.display())))?
                    .into_owned();
                let source = match clean_entry_path(&link) {
                    Ok(Some(rel)) => root.join(rel),
                    Ok(None) => return Err(bad(format!("hard link to the root: {}", raw.display()))),
                    Err(reason) => return Err(bad(format!("{}: {}", reason, link.display()))),
                };
                if fs::symlink_metadata(&source).is_err() {
                    return Err(bad(format!(
                        "hard link {} points at missing {}",
                        raw.display(),
                        link.display()
                    )));
                }
                check_inside(&root, &source).map_err(bad)?;
                prepare_parent(&root, &target).map_err(bad)?;
                remove_existing(&target).map_err(InstallError::fs_at("replace", &target))?;
                fs::hard_link(&source, &target).map_err(InstallError::fs_at("link", &target))?;
            }
            other => {
                log_warning(&format!(
                    "Skipping {} in {}: unsupported entry type {:?}",
                    raw.display(),
                    label,
                    other
                ));
            }
        }
    }

    if !seen_any {
        return Err(bad("archive is empty".to_string()));
    }
    top.ok_or_else(|| bad("archive has no usable entries".to_string()))
}

/// Lexically normalize an entry path. `None` for entries that resolve to `.`.
fn clean_entry_path(raw: &Path) -> Result<Option<PathBuf>, &'static str> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in raw.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => return Err("absolute path"),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err("path escapes destination");
                }
            }
            Component::Normal(part) => parts.push(part),
        }
    }
    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(parts.iter().collect()))
}

/// Create the parent of `target`, refusing if any existing ancestor resolves outside `root`.
fn prepare_parent(root: &Path, target: &Path) -> Result<(), String> {
    let Some(parent) = target.parent() else {
        return Ok(());
    };

    let mut existing = parent;
    while !existing.exists() {
        match existing.parent() {
            Some(p) => existing = p,
            None => break,
        }
    }
    check_inside(root, existing)?;

    fs::create_dir_all(parent).map_err(|e| format!("create {}: {}", parent.display(), e))?;
    check_inside(root, parent)
}

fn check_inside(root: &Path, dir: &Path) -> Result<(), String> {
    let resolved = dir
        .canonicalize()
        .map_err(|e| format!("resolve {}: {}", dir.display(), e))?;
    if resolved.starts_with(root) {
        Ok(())
    } else {
        Err(format!("{} resolves outside the destination", dir.display()))
    }
}

fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
