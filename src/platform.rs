//! Platform detection, the tool catalog and release asset selection

use std::fmt;
use std::path::Path;

use crate::error::InstallError;
use crate::github::{Asset, Release};

// ============================================================================
// Platform
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    MacOs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Os {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" => Some(Os::Linux),
            "macos" | "darwin" | "osx" => Some(Os::MacOs),
            _ => None,
        }
    }

    /// Token used in asset names.
    pub fn token(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::MacOs => "macos",
        }
    }

    /// Every spelling an asset name may use for this OS.
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Os::Linux => &["linux"],
            Os::MacOs => &["macos", "darwin", "apple"],
        }
    }
}

impl Arch {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Some(Arch::X86_64),
            "aarch64" | "arm64" => Some(Arch::Aarch64),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        }
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Arch::X86_64 => &["x86_64", "amd64"],
            Arch::Aarch64 => &["aarch64", "arm64"],
        }
    }
}

/// Host OS and architecture as raw strings, validated lazily against the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn current() -> Self {
        Self::parse(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Accepts aliases (`amd64`, `arm64`, `darwin`) and normalizes known values.
    pub fn parse(os: &str, arch: &str) -> Self {
        Self {
            os: Os::parse(os)
                .map(|o| o.token().to_string())
                .unwrap_or_else(|| os.trim().to_ascii_lowercase()),
            arch: Arch::parse(arch)
                .map(|a| a.token().to_string())
                .unwrap_or_else(|| arch.trim().to_ascii_lowercase()),
        }
    }

    fn known(&self) -> Option<(Os, Arch)> {
        Some((Os::parse(&self.os)?, Arch::parse(&self.arch)?))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

// ============================================================================
// Tool Catalog
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tool {
    Neovim,
    Ripgrep,
    Fd,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::Neovim, Tool::Ripgrep, Tool::Fd];

    pub fn id(&self) -> &'static str {
        match self {
            Tool::Neovim => "neovim",
            Tool::Ripgrep => "ripgrep",
            Tool::Fd => "fd",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "neovim" | "nvim" => Some(Tool::Neovim),
            "ripgrep" | "rg" => Some(Tool::Ripgrep),
            "fd" => Some(Tool::Fd),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Tool::Neovim => "Neovim",
            Tool::Ripgrep => "ripgrep",
            Tool::Fd => "fd",
        }
    }

    pub fn feature_key(&self) -> &'static str {
        match self {
            Tool::Neovim => crate::config::FEATURE_INSTALL_NEOVIM,
            Tool::Ripgrep => crate::config::FEATURE_INSTALL_RIPGREP,
            Tool::Fd => crate::config::FEATURE_INSTALL_FD,
        }
    }

    /// Command name on the search path and in the bin dir.
    pub fn binary(&self) -> &'static str {
        match self {
            Tool::Neovim => "nvim",
            Tool::Ripgrep => "rg",
            Tool::Fd => "fd",
        }
    }

    pub fn repo(&self) -> (&'static str, &'static str) {
        match self {
            Tool::Neovim => ("neovim", "neovim"),
            Tool::Ripgrep => ("BurntSushi", "ripgrep"),
            Tool::Fd => ("sharkdp", "fd"),
        }
    }

    /// Fixed location of the binary inside the unpacked tree, when there is one.
    pub fn binary_rel_path(&self) -> Option<&'static Path> {
        match self {
            Tool::Neovim => Some(Path::new("bin/nvim")),
            _ => None,
        }
    }

    fn asset_prefix(&self) -> &'static str {
        match self {
            Tool::Neovim => "nvim-",
            Tool::Ripgrep => "ripgrep-",
            Tool::Fd => "fd-",
        }
    }

    /// Exact asset file name for one platform target.
    fn asset_name(&self, tag: &str, target: &str) -> String {
        match self {
            Tool::Neovim => format!("nvim-{}.tar.gz", target),
            Tool::Ripgrep => format!(
                "ripgrep-{}-{}.tar.gz",
                tag.strip_prefix('v').unwrap_or(tag),
                target
            ),
            Tool::Fd => format!("fd-{}-{}.tar.gz", tag, target),
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// ============================================================================
// Platform Table
// ============================================================================

struct TableRow {
    os: Os,
    arch: Arch,
    tool: Tool,
    /// Preferred first
    targets: &'static [&'static str],
}

const TABLE: &[TableRow] = &[
    TableRow { os: Os::Linux, arch: Arch::X86_64, tool: Tool::Neovim, targets: &["linux-x86_64"] },
    TableRow { os: Os::Linux, arch: Arch::Aarch64, tool: Tool::Neovim, targets: &["linux-arm64"] },
    TableRow { os: Os::MacOs, arch: Arch::X86_64, tool: Tool::Neovim, targets: &["macos-x86_64"] },
    TableRow { os: Os::MacOs, arch: Arch::Aarch64, tool: Tool::Neovim, targets: &["macos-arm64"] },
    TableRow {
        os: Os::Linux,
        arch: Arch::X86_64,
        tool: Tool::Ripgrep,
        targets: &["x86_64-unknown-linux-musl"],
    },
    TableRow {
        os: Os::Linux,
        arch: Arch::Aarch64,
        tool: Tool::Ripgrep,
        targets: &["aarch64-unknown-linux-gnu", "aarch64-unknown-linux-musl"],
    },
    TableRow { os: Os::MacOs, arch: Arch::X86_64, tool: Tool::Ripgrep, targets: &["x86_64-apple-darwin"] },
    TableRow { os: Os::MacOs, arch: Arch::Aarch64, tool: Tool::Ripgrep, targets: &["aarch64-apple-darwin"] },
    TableRow {
        os: Os::Linux,
        arch: Arch::X86_64,
        tool: Tool::Fd,
        targets: &["x86_64-unknown-linux-gnu", "x86_64-unknown-linux-musl"],
    },
    TableRow {
        os: Os::Linux,
        arch: Arch::Aarch64,
        tool: Tool::Fd,
        targets: &["aarch64-unknown-linux-gnu", "aarch64-unknown-linux-musl"],
    },
    TableRow { os: Os::MacOs, arch: Arch::X86_64, tool: Tool::Fd, targets: &["x86_64-apple-darwin"] },
    TableRow { os: Os::MacOs, arch: Arch::Aarch64, tool: Tool::Fd, targets: &["aarch64-apple-darwin"] },
];

/// Candidate targets for a tool on a platform, or `UnsupportedPlatform`.
pub fn candidates(tool: Tool, platform: &Platform) -> Result<&'static [&'static str], InstallError> {
    let unsupported = || InstallError::UnsupportedPlatform {
        tool: tool.display_name().to_string(),
        os: platform.os.clone(),
        arch: platform.arch.clone(),
    };
    let (os, arch) = platform.known().ok_or_else(unsupported)?;
    TABLE
        .iter()
        .find(|row| row.os == os && row.arch == arch && row.tool == tool)
        .map(|row| row.targets)
        .ok_or_else(unsupported)
}

/// Pick the asset for `tool` on `platform`.
///
/// Exact names built from the table come first. If none exist the release is
/// scanned for a `.tar.gz` with the tool's prefix that mentions the OS and
/// some spelling of the architecture.
pub fn select_asset(release: &Release, platform: &Platform, tool: Tool) -> Option<Asset> {
    let targets = candidates(tool, platform).ok()?;
    let (os, arch) = platform.known()?;

    for target in targets {
        let name = tool.asset_name(&release.tag, target);
        if let Some(asset) = release.asset_named(&name) {
            return Some(asset.clone());
        }
    }

    release
        .find_asset(|a| {
            let name = a.name.to_ascii_lowercase();
            name.starts_with(tool.asset_prefix())
                && name.ends_with(".tar.gz")
                && os.aliases().iter().any(|t| name.contains(t))
                && arch.aliases().iter().any(|t| name.contains(t))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> Asset {
        Asset {
            name: name.to_string(),
            download_url: format!("https://example.invalid/{}", name),
            size: 1,
        }
    }

    fn release(tag: &str, names: &[&str]) -> Release {
        Release {
            tag: tag.to_string(),
            notes: String::new(),
            assets: names.iter().map(|n| asset(n)).collect(),
        }
    }

    #[test]
    fn test_platform_aliases() {
        assert_eq!(Platform::parse("linux", "amd64"), Platform::parse("Linux", "x86_64"));
        assert_eq!(Platform::parse("darwin", "arm64").to_string(), "macos/aarch64");
        assert_eq!(Platform::parse("freebsd", "riscv64").to_string(), "freebsd/riscv64");
    }

    #[test]
    fn test_ripgrep_linux_amd64_picks_musl() {
        let rel = release(
            "13.0.0",
            &[
                "ripgrep-13.0.0-arm-unknown-linux-gnueabihf.tar.gz",
                "ripgrep-13.0.0-x86_64-apple-darwin.tar.gz",
                "ripgrep-13.0.0-x86_64-unknown-linux-musl.tar.gz",
                "ripgrep-13.0.0-x86_64-unknown-linux-musl.tar.gz.sha256",
                "ripgrep_13.0.0_amd64.deb",
            ],
        );
        let picked = select_asset(&rel, &Platform::parse("linux", "amd64"), Tool::Ripgrep).unwrap();
        assert_eq!(picked.name, "ripgrep-13.0.0-x86_64-unknown-linux-musl.tar.gz");
    }

    #[test]
    fn test_ripgrep_strips_v_from_tag() {
        let rel = release("v14.1.1", &["ripgrep-14.1.1-aarch64-apple-darwin.tar.gz"]);
        let picked = select_asset(&rel, &Platform::parse("macos", "arm64"), Tool::Ripgrep).unwrap();
        assert_eq!(picked.name, "ripgrep-14.1.1-aarch64-apple-darwin.tar.gz");
    }

    #[test]
    fn test_fd_prefers_first_target() {
        let rel = release(
            "v10.2.0",
            &[
                "fd-v10.2.0-x86_64-unknown-linux-musl.tar.gz",
                "fd-v10.2.0-x86_64-unknown-linux-gnu.tar.gz",
            ],
        );
        let picked = select_asset(&rel, &Platform::parse("linux", "x86_64"), Tool::Fd).unwrap();
        assert_eq!(picked.name, "fd-v10.2.0-x86_64-unknown-linux-gnu.tar.gz");
    }

    #[test]
    fn test_neovim_exact_names() {
        let rel = release(
            "v0.11.5",
            &[
                "nvim-linux-arm64.tar.gz",
                "nvim-linux-x86_64.tar.gz",
                "nvim-macos-arm64.tar.gz",
                "nvim-linux-x86_64.appimage",
            ],
        );
        let linux = select_asset(&rel, &Platform::parse("linux", "x86_64"), Tool::Neovim).unwrap();
        assert_eq!(linux.name, "nvim-linux-x86_64.tar.gz");
        let mac = select_asset(&rel, &Platform::parse("darwin", "arm64"), Tool::Neovim).unwrap();
        assert_eq!(mac.name, "nvim-macos-arm64.tar.gz");
        assert!(select_asset(&rel, &Platform::parse("macos", "x86_64"), Tool::Neovim).is_none());
    }

    #[test]
    fn test_fallback_scan_accepts_arch_alias() {
        let rel = release("v1.0.0", &["fd-v1.0.0-linux-amd64.tar.gz", "fd-v1.0.0-linux-amd64.zip"]);
        let picked = select_asset(&rel, &Platform::parse("linux", "x86_64"), Tool::Fd).unwrap();
        assert_eq!(picked.name, "fd-v1.0.0-linux-amd64.tar.gz");
    }

    #[test]
    fn test_fallback_requires_prefix_and_os() {
        let rel = release(
            "v1.0.0",
            &["other-v1.0.0-x86_64-unknown-linux-gnu.tar.gz", "fd-v1.0.0-x86_64-windows.tar.gz"],
        );
        assert!(select_asset(&rel, &Platform::parse("linux", "x86_64"), Tool::Fd).is_none());
    }

    #[test]
    fn test_unsupported_platform_is_distinct_error() {
        let err = candidates(Tool::Fd, &Platform::parse("windows", "x86_64")).unwrap_err();
        assert!(matches!(err, InstallError::UnsupportedPlatform { .. }));
        let err = candidates(Tool::Neovim, &Platform::parse("linux", "riscv64")).unwrap_err();
        assert!(matches!(err, InstallError::UnsupportedPlatform { .. }));
    }

    #[test]
    fn test_every_tool_covers_supported_platforms() {
        for tool in Tool::ALL {
            for os in ["linux", "macos"] {
                for arch in ["x86_64", "aarch64"] {
                    let targets = candidates(tool, &Platform::parse(os, arch)).unwrap();
                    assert!(!targets.is_empty());
                }
            }
        }
    }
}
