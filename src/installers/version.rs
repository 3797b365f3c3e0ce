//! Installed version probing

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use wait_timeout::ChildExt;

use super::InstallEnv;
use crate::env_path::{find_in_path, is_executable};
use crate::logging::log_warning;
use crate::platform::Tool;

/// Strip surrounding whitespace and one leading `v`.
pub fn normalize_version(v: &str) -> String {
    let v = v.trim();
    v.strip_prefix('v').unwrap_or(v).to_string()
}

/// Second field of the first non-empty line, e.g. `NVIM v0.11.5` -> `0.11.5`.
pub fn parse_version_output(output: &str) -> Option<String> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let field = line.split_whitespace().nth(1)?;
    let version = normalize_version(field);
    (!version.is_empty()).then_some(version)
}

/// Run `<binary> --version`, giving up after `timeout`.
///
/// Stdout is drained on a helper thread so a chatty binary cannot fill the
/// pipe and stall before it exits.
pub fn probe_installed_version(binary: &Path, timeout: Duration) -> Option<String> {
    let mut child = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;

    let mut stdout = child.stdout.take()?;
    let reader = thread::spawn(move || {
        let mut output = String::new();
        stdout.read_to_string(&mut output).map(|_| output)
    });

    let finished = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status.success(),
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            log_warning(&format!(
                "{} --version did not finish within {:?}",
                binary.display(),
                timeout
            ));
            false
        }
        Err(_) => {
            let _ = child.kill();
            let _ = child.wait();
            false
        }
    };

    if !finished {
        // A grandchild may still hold the pipe; leave the reader detached.
        return None;
    }
    let output = reader.join().ok()?.ok()?;
    parse_version_output(&output)
}

/// Where `tool` is installed: the shared bin directory, which need not be on
/// `PATH`, then the search path.
pub fn locate_installed(tool: Tool, env: &InstallEnv) -> Option<PathBuf> {
    let published = env.bin_dir.join(tool.binary());
    if is_executable(&published) {
        return Some(published);
    }
    find_in_path(tool.binary(), env.search_path.as_deref())
}

/// Locate `tool` and ask it for its version.
pub fn installed_version(tool: Tool, env: &InstallEnv) -> Option<(PathBuf, String)> {
    let path = locate_installed(tool, env)?;
    let version = probe_installed_version(&path, env.probe_timeout)?;
    Some((path, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_script;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("v0.11.5"), "0.11.5");
        assert_eq!(normalize_version(" 14.1.1 "), "14.1.1");
        assert_eq!(normalize_version("vv1"), "v1");
    }

    #[test]
    fn test_parse_version_output() {
        assert_eq!(
            parse_version_output("NVIM v0.11.5\nBuild type: Release\n").as_deref(),
            Some("0.11.5")
        );
        assert_eq!(
            parse_version_output("\n\nripgrep 14.1.1 (rev 4649aa9700)\n").as_deref(),
            Some("14.1.1")
        );
        assert_eq!(parse_version_output("fd 10.2.0").as_deref(), Some("10.2.0"));
        assert_eq!(parse_version_output("fd"), None);
        assert_eq!(parse_version_output(""), None);
    }

    #[test]
    fn test_probe_runs_binary() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("nvim");
        write_script(&bin, "echo 'NVIM v0.11.5'");
        assert_eq!(
            probe_installed_version(&bin, Duration::from_secs(5)).as_deref(),
            Some("0.11.5")
        );
    }

    #[test]
    fn test_probe_drains_large_output() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("rg");
        write_script(
            &bin,
            "echo 'ripgrep 14.1.1'; i=0; while [ $i -lt 4000 ]; do echo 'feature line padding the version banner well past a pipe buffer'; i=$((i+1)); done",
        );
        let start = Instant::now();
        assert_eq!(
            probe_installed_version(&bin, Duration::from_secs(5)).as_deref(),
            Some("14.1.1")
        );
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_probe_times_out() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("slow");
        write_script(&bin, "exec sleep 30");
        let start = Instant::now();
        assert_eq!(probe_installed_version(&bin, Duration::from_millis(200)), None);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_probe_failure_is_none() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("broken");
        write_script(&bin, "echo 'tool 1.0'; exit 3");
        assert_eq!(probe_installed_version(&bin, Duration::from_secs(5)), None);
        assert_eq!(probe_installed_version(&dir.path().join("absent"), Duration::from_secs(1)), None);
    }
}
