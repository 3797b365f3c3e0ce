//! Publishing binaries into the shared bin directory

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::InstallError;
use crate::logging::{log_install, log_warning};

/// Make `source` available as `<bin_dir>/<name>`.
///
/// Whatever is at the destination is replaced. A symlink is preferred; if
/// the filesystem refuses one the binary is copied with executable
/// permissions instead. Publishing the same source twice is a no-op.
/// Links always point at the absolute source path.
pub fn publish_binary(source: &Path, bin_dir: &Path, name: &str) -> Result<PathBuf, InstallError> {
    let source = source
        .canonicalize()
        .map_err(InstallError::fs_at("resolve", source))?;
    let source = source.as_path();
    fs::create_dir_all(bin_dir).map_err(InstallError::fs_at("create", bin_dir))?;
    let dest = bin_dir.join(name);

    if fs::read_link(&dest).ok().as_deref() == Some(source) {
        return Ok(dest);
    }

    remove_entry(&dest).map_err(InstallError::fs_at("remove", &dest))?;

    match std::os::unix::fs::symlink(source, &dest) {
        Ok(()) => {
            log_install(&format!("Linked {} -> {}", dest.display(), source.display()));
        }
        Err(e) => {
            log_warning(&format!(
                "Symlink {} failed ({}), copying instead",
                dest.display(),
                e
            ));
            copy_executable(source, &dest)?;
            log_install(&format!("Copied {} to {}", source.display(), dest.display()));
        }
    }
    Ok(dest)
}

/// Copy `source` to `dest` through a sibling temp file, then mark it executable.
pub fn copy_executable(source: &Path, dest: &Path) -> Result<(), InstallError> {
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{}.kitup-{}", file_name, std::process::id()));

    let result = (|| -> Result<(), InstallError> {
        fs::copy(source, &tmp).map_err(InstallError::fs_at("copy to", &tmp))?;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o755))
            .map_err(InstallError::fs_at("chmod", &tmp))?;
        fs::rename(&tmp, dest).map_err(InstallError::fs_at("move into place", dest))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn remove_entry(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "a directory is in the way",
        )),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_script;
    use tempfile::TempDir;

    #[test]
    fn test_publish_links_and_replaces() {
        let dir = TempDir::new().unwrap();
        let bin_dir = dir.path().join("bin");
        let v1 = dir.path().join("v1/rg");
        let v2 = dir.path().join("v2/rg");
        write_script(&v1, "echo 'ripgrep 13.0.0'");
        write_script(&v2, "echo 'ripgrep 14.1.1'");

        let dest = publish_binary(&v1, &bin_dir, "rg").unwrap();
        assert_eq!(dest, bin_dir.join("rg"));
        assert_eq!(fs::read_link(&dest).unwrap(), v1.canonicalize().unwrap());

        // same source again
        assert_eq!(publish_binary(&v1, &bin_dir, "rg").unwrap(), dest);
        assert_eq!(fs::read_link(&dest).unwrap(), v1.canonicalize().unwrap());

        publish_binary(&v2, &bin_dir, "rg").unwrap();
        assert_eq!(fs::read_link(&dest).unwrap(), v2.canonicalize().unwrap());
    }

    #[test]
    fn test_publish_replaces_regular_file() {
        let dir = TempDir::new().unwrap();
        let bin_dir = dir.path().join("bin");
        fs::create_dir_all(&bin_dir).unwrap();
        fs::write(bin_dir.join("fd"), "old copy").unwrap();
        let src = dir.path().join("fd-v10/fd");
        write_script(&src, "echo 'fd 10.2.0'");

        let dest = publish_binary(&src, &bin_dir, "fd").unwrap();
        assert_eq!(fs::read_link(&dest).unwrap(), src.canonicalize().unwrap());
    }

    #[test]
    fn test_relative_source_links_to_absolute_path() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let binary = root.join("tools/fd/v10.2.0/fd");
        write_script(&binary, "echo 'fd 10.2.0'");
        let bin_dir = root.join("bin");

        // Same file, spelled relative to the working directory
        let cwd = std::env::current_dir().unwrap();
        let mut relative = PathBuf::new();
        for _ in cwd.components().skip(1) {
            relative.push("..");
        }
        relative.push(binary.strip_prefix("/").unwrap());
        assert!(relative.is_relative());

        let dest = publish_binary(&relative, &bin_dir, "fd").unwrap();
        let target = fs::read_link(&dest).unwrap();
        assert!(target.is_absolute());
        assert_eq!(target, binary);
        assert!(fs::metadata(&dest).unwrap().permissions().mode() & 0o111 != 0);
    }

    #[test]
    fn test_directory_in_the_way_is_error() {
        let dir = TempDir::new().unwrap();
        let bin_dir = dir.path().join("bin");
        fs::create_dir_all(bin_dir.join("nvim")).unwrap();
        let src = dir.path().join("nvim");
        write_script(&src, "true");
        assert!(matches!(
            publish_binary(&src, &bin_dir, "nvim").unwrap_err(),
            InstallError::Filesystem { .. }
        ));
    }

    #[test]
    fn test_copy_executable_sets_mode() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src-rg");
        fs::write(&src, "binary").unwrap();
        let dest = dir.path().join("rg");
        fs::write(&dest, "stale").unwrap();

        copy_executable(&src, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"binary");
        assert_eq!(fs::metadata(&dest).unwrap().permissions().mode() & 0o777, 0o755);
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".kitup-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
