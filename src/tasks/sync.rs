//! Headless plugin sync

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use super::config_write::HEADLESS_INIT;
use crate::config::ConfigTarget;
use crate::error::InstallError;
use crate::installers::TaskContext;
use crate::logging::{log_error, log_install};

const POLL: Duration = Duration::from_millis(250);

/// Run `nvim --headless -u <headless init> "+Lazy! sync" +qa` against the
/// written configuration, killing it on cancel or after `timeout`.
pub fn sync_plugins(
    nvim: &Path,
    config_dir: &Path,
    target: &ConfigTarget,
    timeout: Duration,
    ctx: &TaskContext,
) -> Result<(), InstallError> {
    let headless = config_dir.join(HEADLESS_INIT);
    if !headless.is_file() {
        return Err(InstallError::Other {
            context: "Plugin sync".to_string(),
            reason: format!("{} not found; write the configuration first", headless.display()),
        });
    }

    let mut output = tempfile::tempfile().map_err(InstallError::fs("create sync log"))?;
    let stdout = output.try_clone().map_err(InstallError::fs("share sync log"))?;
    let stderr = output.try_clone().map_err(InstallError::fs("share sync log"))?;

    let mut cmd = Command::new(nvim);
    cmd.arg("--headless")
        .arg("-u")
        .arg(&headless)
        .arg("+Lazy! sync")
        .arg("+qa")
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    match target {
        ConfigTarget::Safe { app_name } => {
            cmd.env("NVIM_APPNAME", app_name);
        }
        ConfigTarget::Default => {
            cmd.env_remove("NVIM_APPNAME");
        }
    }

    log_install(&format!("Running plugin sync with {}", nvim.display()));
    ctx.log(format!("Syncing plugins with {}", nvim.display()));
    let mut child = cmd
        .spawn()
        .map_err(InstallError::fs_at("start", nvim))?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.wait_timeout(POLL) {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(InstallError::fs("wait for plugin sync")(e));
            }
        }
        if ctx.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(InstallError::Cancelled);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            relay_output(&mut output, ctx);
            log_error(&format!("Plugin sync timed out after {:?}", timeout));
            return Err(InstallError::Other {
                context: "Plugin sync".to_string(),
                reason: format!("timed out after {}s", timeout.as_secs()),
            });
        }
    };

    relay_output(&mut output, ctx);

    if status.success() {
        ctx.log("Plugin sync completed".to_string());
        Ok(())
    } else {
        log_error(&format!("Plugin sync exited with {:?}", status.code()));
        Err(InstallError::Other {
            context: "Plugin sync".to_string(),
            reason: match status.code() {
                Some(code) => format!("nvim exited with code {}", code),
                None => "nvim was terminated by a signal".to_string(),
            },
        })
    }
}

fn relay_output(file: &mut std::fs::File, ctx: &TaskContext) {
    let mut text = String::new();
    if file.seek(SeekFrom::Start(0)).is_err() || file.read_to_string(&mut text).is_err() {
        return;
    }
    for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        ctx.log(format!("[nvim] {}", line));
        log_install(&format!("[nvim] {}", line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_script;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn capturing_ctx(cancel: bool) -> (TaskContext, Arc<Mutex<Vec<String>>>) {
        let lines: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&lines);
        let ctx = TaskContext::new(
            |_| {},
            move |msg| sink.lock().push(msg),
            |_, _| {},
            Arc::new(AtomicBool::new(cancel)),
        );
        (ctx, lines)
    }

    fn config_dir(dir: &Path) -> std::path::PathBuf {
        let cfg = dir.join("cfg");
        std::fs::create_dir_all(&cfg).unwrap();
        std::fs::write(cfg.join(HEADLESS_INIT), "-- init\n").unwrap();
        cfg
    }

    #[test]
    fn test_passes_arguments_and_app_name() {
        let dir = TempDir::new().unwrap();
        let nvim = dir.path().join("nvim");
        write_script(&nvim, r#"for a in "$@"; do echo "arg:$a"; done; echo "app:$NVIM_APPNAME""#);
        let cfg = config_dir(dir.path());
        let (ctx, lines) = capturing_ctx(false);

        let target = ConfigTarget::Safe {
            app_name: "nvim-kitup".to_string(),
        };
        sync_plugins(&nvim, &cfg, &target, Duration::from_secs(20), &ctx).unwrap();

        let lines = lines.lock();
        assert!(lines.contains(&"[nvim] arg:--headless".to_string()));
        assert!(lines.contains(&"[nvim] arg:+Lazy! sync".to_string()));
        assert!(lines.contains(&"[nvim] arg:+qa".to_string()));
        assert!(lines.contains(&format!("[nvim] arg:{}", cfg.join(HEADLESS_INIT).display())));
        assert!(lines.contains(&"[nvim] app:nvim-kitup".to_string()));
    }

    #[test]
    fn test_nonzero_exit_is_error() {
        let dir = TempDir::new().unwrap();
        let nvim = dir.path().join("nvim");
        write_script(&nvim, "echo 'E5108: lazy failed' >&2; exit 2");
        let cfg = config_dir(dir.path());
        let (ctx, lines) = capturing_ctx(false);

        let err = sync_plugins(&nvim, &cfg, &ConfigTarget::Default, Duration::from_secs(20), &ctx).unwrap_err();
        assert!(err.to_string().contains("code 2"));
        assert!(lines.lock().iter().any(|l| l.contains("E5108")));
    }

    #[test]
    fn test_timeout_kills_child() {
        let dir = TempDir::new().unwrap();
        let nvim = dir.path().join("nvim");
        write_script(&nvim, "exec sleep 30");
        let cfg = config_dir(dir.path());
        let (ctx, _) = capturing_ctx(false);

        let started = Instant::now();
        let err = sync_plugins(&nvim, &cfg, &ConfigTarget::Default, Duration::from_millis(300), &ctx).unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancel_stops_sync() {
        let dir = TempDir::new().unwrap();
        let nvim = dir.path().join("nvim");
        write_script(&nvim, "exec sleep 30");
        let cfg = config_dir(dir.path());
        let (ctx, _) = capturing_ctx(true);

        let err = sync_plugins(&nvim, &cfg, &ConfigTarget::Default, Duration::from_secs(60), &ctx).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_missing_headless_init_is_error() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = capturing_ctx(false);
        assert!(sync_plugins(
            Path::new("/nonexistent/nvim"),
            dir.path(),
            &ConfigTarget::Default,
            Duration::from_secs(1),
            &ctx
        )
        .is_err());
    }
}
