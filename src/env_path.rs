//! Command search path helpers

use std::env;
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// First executable named `binary` on `search_path`, or on `$PATH` when `None`.
pub fn find_in_path(binary: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let owned;
    let path = match search_path {
        Some(p) => p,
        None => {
            owned = env::var_os("PATH")?;
            owned.as_os_str()
        }
    };
    env::split_paths(path)
        .filter(|entry| !entry.as_os_str().is_empty())
        .map(|entry| entry.join(binary))
        .find(|candidate| is_executable(candidate))
}

pub fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Prepend `dir` to this process's `PATH` unless it is already listed.
/// Returns whether `PATH` changed. Child processes inherit the result; the
/// user's shell configuration is never touched.
pub fn ensure_dir_in_path(dir: &Path) -> bool {
    let current = env::var_os("PATH").unwrap_or_default();
    if env::split_paths(&current).any(|entry| entry == dir) {
        return false;
    }

    let entries = std::iter::once(dir.to_path_buf()).chain(env::split_paths(&current));
    match env::join_paths(entries) {
        Ok(joined) => {
            env::set_var("PATH", joined);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_script;
    use std::ffi::OsString;
    use tempfile::TempDir;

    #[test]
    fn test_find_in_explicit_search_path() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        std::fs::write(a.path().join("rg"), "not executable").unwrap();
        write_script(&b.path().join("rg"), "echo ripgrep 14.1.1");

        let search = env::join_paths([a.path(), b.path()]).unwrap();
        assert_eq!(find_in_path("rg", Some(&search)), Some(b.path().join("rg")));
        assert_eq!(find_in_path("fd", Some(&search)), None);
        assert_eq!(find_in_path("rg", Some(&OsString::new())), None);
    }

    #[test]
    fn test_ensure_dir_in_path_is_idempotent() {
        let dir = TempDir::new().unwrap();
        assert!(ensure_dir_in_path(dir.path()));
        assert!(!ensure_dir_in_path(dir.path()));
        let path = env::var_os("PATH").unwrap();
        assert!(env::split_paths(&path).any(|e| e == dir.path()));
    }
}
