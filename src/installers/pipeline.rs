//! Per-tool install pipeline

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use walkdir::WalkDir;

use super::publish::publish_binary;
use super::version::{installed_version, normalize_version};
use super::{InstallEnv, TaskContext};
use crate::archive::extract_tar_gz;
use crate::checksum::{self, Verification, VerifyPolicy};
use crate::env_path::is_executable;
use crate::error::InstallError;
use crate::logging::{log_download, log_install};
use crate::platform::{self, select_asset, Tool};

/// What an install reports back to its task.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallOutcome {
    pub tool: Tool,
    pub tag: String,
    /// Published path, or the existing binary when the install was skipped
    pub path: PathBuf,
    /// True when the installed version already matched the release
    pub skipped: bool,
}

/// Install (or confirm) the latest or pinned release of `tool`.
pub fn install_tool(
    tool: Tool,
    policy: VerifyPolicy,
    env: &InstallEnv,
    ctx: &TaskContext,
) -> Result<InstallOutcome, InstallError> {
    // 1. Platform check, before any network traffic
    platform::candidates(tool, &env.platform)?;
    ctx.check_cancelled()?;

    // 2. Resolve
    ctx.set_status(format!("Resolving {} release...", tool));
    let release = env.resolve(tool, &ctx.cancel_flag)?;
    log_install(&format!("{}: target release {}", tool, release.tag));

    // 3. Skip if already current
    if let Some((path, current)) = installed_version(tool, env) {
        if current == normalize_version(&release.tag) {
            ctx.log(format!(
                "{} already up to date ({}), skipping download",
                tool, release.tag
            ));
            return Ok(InstallOutcome {
                tool,
                tag: release.tag,
                path,
                skipped: true,
            });
        }
        ctx.log(format!(
            "{} {} found at {}, updating to {}",
            tool,
            current,
            path.display(),
            release.tag
        ));
    }

    // 4. Select
    let asset = select_asset(&release, &env.platform, tool).ok_or_else(|| {
        InstallError::AssetNotFound {
            tool: tool.display_name().to_string(),
            tag: release.tag.clone(),
            platform: env.platform.to_string(),
        }
    })?;

    // 5. Download into a scratch dir that is always cleaned up
    let scratch = tempfile::Builder::new()
        .prefix(&format!("kitup-{}-", tool.id()))
        .tempdir()
        .map_err(InstallError::fs("create scratch directory"))?;
    let archive = scratch.path().join(&asset.name);

    ctx.set_status(format!("Downloading {}...", asset.name));
    ctx.log(format!("Downloading {}", asset.name));
    let download = env
        .downloader
        .download(&asset.download_url, &archive, &ctx.cancel_flag)?;
    log_download(&format!("{} sha256 {}", asset.name, download.sha256_hex));

    // 6. Verify
    ctx.set_status(format!("Verifying {}...", asset.name));
    let fetch_text = |url: &str| env.downloader.read_text(url, &ctx.cancel_flag);
    let log = |msg: &str| ctx.log(msg.to_string());
    let verification = checksum::verify(
        policy,
        &release,
        &asset,
        &download.path,
        &download.sha256_hex,
        &fetch_text,
        &log,
    )?;
    if verification == Verification::Skipped {
        ctx.log(format!("Checksum verification is off for {}", asset.name));
    }
    ctx.check_cancelled()?;

    // 7. Unpack into a versioned root
    ctx.set_status(format!("Extracting {}...", asset.name));
    let version_dir = place_release(&download.path, &env.tool_root(tool), &release.tag)?;

    // 8. Publish
    let binary = locate_binary(tool, &version_dir)?;
    let published = publish_binary(&binary, &env.bin_dir, tool.binary())?;
    ctx.log(format!("Installed {} {} to {}", tool, release.tag, published.display()));
    log_install(&format!(
        "{} {} installed at {} (binary {})",
        tool,
        release.tag,
        published.display(),
        binary.display()
    ));

    Ok(InstallOutcome {
        tool,
        tag: release.tag,
        path: published,
        skipped: false,
    })
}

/// Unpack `archive` into `<root>/.tmp-<ts>` and move its top-level directory to
/// `<root>/<tag>`, replacing a stale copy of the same version.
pub fn place_release(archive: &Path, root: &Path, tag: &str) -> Result<PathBuf, InstallError> {
    if tag.is_empty() || tag.contains('/') || tag == "." || tag == ".." {
        return Err(InstallError::Other {
            context: "Place release".to_string(),
            reason: format!("unusable tag '{}'", tag),
        });
    }

    fs::create_dir_all(root).map_err(InstallError::fs_at("create", root))?;
    let staging = root.join(format!(
        ".tmp-{}-{}",
        Local::now().format("%Y%m%d-%H%M%S"),
        std::process::id()
    ));
    fs::create_dir_all(&staging).map_err(InstallError::fs_at("create", &staging))?;

    let result = (|| -> Result<PathBuf, InstallError> {
        let top = extract_tar_gz(archive, &staging)?;
        let unpacked = staging.join(&top);
        if !unpacked.is_dir() {
            return Err(InstallError::Extraction {
                archive: archive.display().to_string(),
                reason: format!("top-level entry '{}' is not a directory", top),
            });
        }

        let target = root.join(tag);
        if fs::symlink_metadata(&target).is_ok() {
            fs::remove_dir_all(&target).map_err(InstallError::fs_at("remove stale", &target))?;
        }
        fs::rename(&unpacked, &target).map_err(InstallError::fs_at("move into place", &target))?;
        Ok(target)
    })();

    let _ = fs::remove_dir_all(&staging);
    result
}

/// Find the tool's executable inside an unpacked release.
pub fn locate_binary(tool: Tool, version_dir: &Path) -> Result<PathBuf, InstallError> {
    if let Some(rel) = tool.binary_rel_path() {
        let candidate = version_dir.join(rel);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }

    WalkDir::new(version_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && e.file_name() == tool.binary())
        .map(|e| e.into_path())
        .find(|p| is_executable(p))
        .ok_or_else(|| InstallError::BinaryNotFound {
            name: tool.binary().to_string(),
            root: version_dir.display().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installers::testing::{env_for, quiet_ctx};
    use crate::test_support::{sha256_hex, tar_gz, write_script, Entry};
    use mockito::{Mock, Server};
    use tempfile::TempDir;

    const FD_ASSET: &str = "fd-v10.2.0-x86_64-unknown-linux-gnu.tar.gz";

    fn fd_archive() -> Vec<u8> {
        tar_gz(&[
            Entry::Dir("fd-v10.2.0-x86_64-unknown-linux-gnu/"),
            Entry::File(
                "fd-v10.2.0-x86_64-unknown-linux-gnu/fd",
                b"#!/bin/sh\necho 'fd 10.2.0'\n",
                0o755,
            ),
            Entry::File("fd-v10.2.0-x86_64-unknown-linux-gnu/README.md", b"fd", 0o644),
        ])
    }

    fn release_json(server: &Server, tag: &str, assets: &[&str]) -> String {
        let assets: Vec<String> = assets
            .iter()
            .map(|name| {
                format!(
                    r#"{{"name": "{}", "browser_download_url": "{}/dl/{}", "size": 1}}"#,
                    name,
                    server.url(),
                    name
                )
            })
            .collect();
        format!(
            r#"{{"tag_name": "{}", "body": "", "assets": [{}]}}"#,
            tag,
            assets.join(",")
        )
    }

    fn serve_release(server: &mut Server, path: &str, tag: &str, assets: &[&str]) -> Mock {
        let body = release_json(server, tag, assets);
        server
            .mock("GET", path)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create()
    }

    fn serve_file(server: &mut Server, name: &str, body: &[u8]) -> Mock {
        server
            .mock("GET", format!("/dl/{}", name).as_str())
            .with_body(body)
            .create()
    }

    #[test]
    fn test_full_install_publishes_link() {
        let mut server = Server::new();
        let archive = fd_archive();
        let sum = format!("{}  {}\n", sha256_hex(&archive), FD_ASSET);
        let sum_name = format!("{}.sha256", FD_ASSET);
        serve_release(&mut server, "/repos/sharkdp/fd/releases/latest", "v10.2.0", &[FD_ASSET, &sum_name]);
        let download = serve_file(&mut server, FD_ASSET, &archive);
        let checksum = serve_file(&mut server, &sum_name, sum.as_bytes());

        let dir = TempDir::new().unwrap();
        let env = env_for(&server.url(), dir.path());
        let outcome = install_tool(Tool::Fd, VerifyPolicy::Require, &env, &quiet_ctx()).unwrap();

        download.assert();
        checksum.assert();
        assert!(!outcome.skipped);
        assert_eq!(outcome.tag, "v10.2.0");
        assert_eq!(outcome.path, dir.path().join("bin/fd"));
        let version_dir = dir.path().join("tools/fd/v10.2.0");
        assert_eq!(
            fs::read_link(&outcome.path).unwrap(),
            version_dir.join("fd").canonicalize().unwrap()
        );
        assert!(version_dir.join("README.md").exists());

        let staging_left: Vec<_> = fs::read_dir(dir.path().join("tools/fd"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(staging_left.is_empty());
    }

    #[test]
    fn test_second_install_finds_published_binary() {
        let mut server = Server::new();
        serve_release(&mut server, "/repos/sharkdp/fd/releases/latest", "v10.2.0", &[FD_ASSET]);
        let download = server
            .mock("GET", format!("/dl/{}", FD_ASSET).as_str())
            .with_body(fd_archive())
            .expect(1)
            .create();

        // bin_dir is not on the search path
        let dir = TempDir::new().unwrap();
        let env = env_for(&server.url(), dir.path());

        let first = install_tool(Tool::Fd, VerifyPolicy::Off, &env, &quiet_ctx()).unwrap();
        let second = install_tool(Tool::Fd, VerifyPolicy::Off, &env, &quiet_ctx()).unwrap();

        assert!(!first.skipped);
        assert!(second.skipped);
        assert_eq!(second.path, dir.path().join("bin/fd"));
        download.assert();
    }

    #[test]
    fn test_up_to_date_skips_download() {
        let mut server = Server::new();
        serve_release(
            &mut server,
            "/repos/neovim/neovim/releases/latest",
            "v0.11.5",
            &["nvim-linux-x86_64.tar.gz"],
        );
        let download = server
            .mock("GET", "/dl/nvim-linux-x86_64.tar.gz")
            .with_status(500)
            .expect(0)
            .create();

        let dir = TempDir::new().unwrap();
        let mut env = env_for(&server.url(), dir.path());
        let existing = dir.path().join("system-bin/nvim");
        write_script(&existing, "echo 'NVIM v0.11.5'; echo 'Build type: Release'");
        env.search_path = Some(dir.path().join("system-bin").into_os_string());

        let outcome = install_tool(Tool::Neovim, VerifyPolicy::Auto, &env, &quiet_ctx()).unwrap();
        assert!(outcome.skipped);
        assert_eq!(outcome.path, existing);
        download.assert();
        assert!(!dir.path().join("bin/nvim").exists());
    }

    #[test]
    fn test_checksum_mismatch_under_require_installs_nothing() {
        let mut server = Server::new();
        let asset = "ripgrep-14.1.1-x86_64-unknown-linux-musl.tar.gz";
        let sum_name = format!("{}.sha256", asset);
        let archive = tar_gz(&[Entry::File(
            "ripgrep-14.1.1-x86_64-unknown-linux-musl/rg",
            b"#!/bin/sh\necho 'ripgrep 14.1.1'\n",
            0o755,
        )]);
        serve_release(&mut server, "/repos/BurntSushi/ripgrep/releases/latest", "14.1.1", &[asset, &sum_name]);
        serve_file(&mut server, asset, &archive);
        serve_file(&mut server, &sum_name, format!("{}  {}\n", "ab".repeat(32), asset).as_bytes());

        let dir = TempDir::new().unwrap();
        let env = env_for(&server.url(), dir.path());
        let err = install_tool(Tool::Ripgrep, VerifyPolicy::Require, &env, &quiet_ctx()).unwrap_err();

        assert!(matches!(err, InstallError::ChecksumMismatch { .. }));
        assert!(!dir.path().join("tools/ripgrep/14.1.1").exists());
        assert!(!dir.path().join("bin/rg").exists());
    }

    #[test]
    fn test_unsupported_platform_makes_no_requests() {
        let mut server = Server::new();
        let latest = server
            .mock("GET", "/repos/sharkdp/fd/releases/latest")
            .with_body(release_json(&server, "v10.2.0", &[FD_ASSET]))
            .expect(0)
            .create();

        let dir = TempDir::new().unwrap();
        let mut env = env_for(&server.url(), dir.path());
        env.platform = crate::platform::Platform::parse("windows", "x86_64");

        let err = install_tool(Tool::Fd, VerifyPolicy::Auto, &env, &quiet_ctx()).unwrap_err();
        assert!(matches!(err, InstallError::UnsupportedPlatform { .. }));
        latest.assert();
    }

    #[test]
    fn test_missing_asset_names_platform() {
        let mut server = Server::new();
        serve_release(
            &mut server,
            "/repos/sharkdp/fd/releases/latest",
            "v10.2.0",
            &["fd_10.2.0_amd64.deb"],
        );

        let dir = TempDir::new().unwrap();
        let env = env_for(&server.url(), dir.path());
        let err = install_tool(Tool::Fd, VerifyPolicy::Auto, &env, &quiet_ctx()).unwrap_err();
        match err {
            InstallError::AssetNotFound { platform, tag, .. } => {
                assert_eq!(platform, "linux/x86_64");
                assert_eq!(tag, "v10.2.0");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_pinned_tag_uses_tag_route() {
        let mut server = Server::new();
        let old_asset = "fd-v9.0.0-x86_64-unknown-linux-gnu.tar.gz";
        let latest = server
            .mock("GET", "/repos/sharkdp/fd/releases/latest")
            .expect(0)
            .create();
        serve_release(&mut server, "/repos/sharkdp/fd/releases/tags/v9.0.0", "v9.0.0", &[old_asset]);
        serve_file(&mut server, old_asset, &fd_archive());

        let dir = TempDir::new().unwrap();
        let mut env = env_for(&server.url(), dir.path());
        env.pins.insert(Tool::Fd, "v9.0.0".to_string());

        let outcome = install_tool(Tool::Fd, VerifyPolicy::Off, &env, &quiet_ctx()).unwrap();
        assert_eq!(outcome.tag, "v9.0.0");
        latest.assert();
        assert!(dir.path().join("tools/fd/v9.0.0/fd").exists());
    }

    #[test]
    fn test_place_release_replaces_stale_version() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("fd.tar.gz");
        fs::write(&archive, fd_archive()).unwrap();
        let root = dir.path().join("fd");
        fs::create_dir_all(root.join("v10.2.0")).unwrap();
        fs::write(root.join("v10.2.0/stale.txt"), "old").unwrap();

        let placed = place_release(&archive, &root, "v10.2.0").unwrap();
        assert_eq!(placed, root.join("v10.2.0"));
        assert!(!placed.join("stale.txt").exists());
        assert!(placed.join("fd").exists());
        assert_eq!(fs::read_dir(&root).unwrap().count(), 1);
    }

    #[test]
    fn test_place_release_rejects_path_tags() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("fd.tar.gz");
        fs::write(&archive, fd_archive()).unwrap();
        assert!(place_release(&archive, dir.path(), "../escape").is_err());
    }

    #[test]
    fn test_locate_binary_by_rel_path_and_walk() {
        let dir = TempDir::new().unwrap();
        write_script(&dir.path().join("nvim/bin/nvim"), "true");
        assert_eq!(
            locate_binary(Tool::Neovim, &dir.path().join("nvim")).unwrap(),
            dir.path().join("nvim/bin/nvim")
        );

        write_script(&dir.path().join("rg-pkg/nested/rg"), "true");
        assert_eq!(
            locate_binary(Tool::Ripgrep, &dir.path().join("rg-pkg")).unwrap(),
            dir.path().join("rg-pkg/nested/rg")
        );

        assert!(matches!(
            locate_binary(Tool::Fd, &dir.path().join("rg-pkg")).unwrap_err(),
            InstallError::BinaryNotFound { .. }
        ));
    }
}
