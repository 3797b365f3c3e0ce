use std::{path::PathBuf, sync::LazyLock};

/// kitup's own state directory: config, profile and logs.
pub static DEFAULT_KITUP_PATH: LazyLock<PathBuf> = LazyLock::new(|| {
    if let Some(home) = std::env::var_os("KITUP_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }

    let mut path = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_default();
    path.push("kitup");
    path
});

/// Computes the path from the kitup state directory based on the arguments.
///
/// Returns a `&Path` referencing the state directory itself if no arguments are passed in, or a
/// `PathBuf` created by joining all of the arguments to the base directory if at least one
/// argument is passed in.
///
/// # Examples
///
/// ```
/// // With KITUP_HOME unset on Linux the base is ~/.config/kitup
/// let logs = kitup::kitup_path!("logs");
/// assert!(logs.ends_with("logs"));
/// ```
#[macro_export]
macro_rules! kitup_path {
    () => {
        $crate::paths::DEFAULT_KITUP_PATH.as_path()
    };

    ( $( $path:expr ),+ $(,)? ) => {
        [
            $crate::paths::DEFAULT_KITUP_PATH.as_path(),
            $( std::path::Path::new(&$path) ),+
        ].into_iter().collect::<std::path::PathBuf>()
    };
}

/// Directory published binaries land in: `~/.local/bin`.
pub fn default_bin_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".local").join("bin")
}

/// Root holding one directory per tool, each with one directory per installed tag.
pub fn default_tools_root() -> PathBuf {
    dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
        .unwrap_or_default()
        .join("kitup")
}

/// Editor config directory for an `NVIM_APPNAME`, e.g. `~/.config/nvim`.
pub fn nvim_config_dir(app_name: &str) -> PathBuf {
    // Neovim uses XDG_CONFIG_HOME on every unix, including macOS.
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_default();
    base.join(app_name)
}

/// Where replaced editor configurations are kept.
pub fn default_backups_dir() -> PathBuf {
    kitup_path!("backups")
}
