//! Checksum verification of downloaded release assets

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::InstallError;
use crate::github::{Asset, Release};
use crate::logging::{log_verify, log_warning};

/// Per-asset checksum file suffixes, tried in order.
const CHECKSUM_SUFFIXES: &[&str] = &[".sha256", ".sha256sum", ".sha256.txt"];

/// Release-wide manifests listing many assets.
const MANIFEST_NAMES: &[&str] = &["shasum.txt", "SHA256SUMS", "sha256sums.txt", "checksums.txt"];

/// How far around a filename mention the release notes are searched.
const NOTES_WINDOW: usize = 500;

const SHA256_HEX_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyPolicy {
    Off,
    #[default]
    Auto,
    Require,
}

impl VerifyPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Some(VerifyPolicy::Off),
            "auto" => Some(VerifyPolicy::Auto),
            "require" => Some(VerifyPolicy::Require),
            _ => None,
        }
    }

    /// Unknown or empty values mean `Auto`.
    pub fn parse_lenient(s: &str) -> Self {
        match Self::parse(s) {
            Some(policy) => policy,
            None => {
                if !s.trim().is_empty() {
                    log_warning(&format!("Unknown verify policy '{}', using auto", s.trim()));
                }
                VerifyPolicy::Auto
            }
        }
    }
}

impl fmt::Display for VerifyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VerifyPolicy::Off => "off",
            VerifyPolicy::Auto => "auto",
            VerifyPolicy::Require => "require",
        })
    }
}

/// Result of a successful [`verify`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Policy was `Off`
    Skipped,
    /// Digest matched; holds the name of the source that vouched for it
    Verified(String),
    /// No usable source; tolerated under `Auto`
    Unverified(String),
}

/// Check `computed_hex` for `asset` against what the release publishes.
///
/// `fetch_text` downloads a checksum asset by URL. A definite mismatch is always
/// an error; a missing source is an error only under `Require`.
pub fn verify(
    policy: VerifyPolicy,
    release: &Release,
    asset: &Asset,
    path: &Path,
    computed_hex: &str,
    fetch_text: &dyn Fn(&str) -> Result<String, InstallError>,
    log: &dyn Fn(&str),
) -> Result<Verification, InstallError> {
    if policy == VerifyPolicy::Off {
        return Ok(Verification::Skipped);
    }

    let unavailable = |reason: String| -> Result<Verification, InstallError> {
        match policy {
            VerifyPolicy::Require => Err(InstallError::ChecksumUnavailable {
                asset: asset.name.clone(),
                reason,
            }),
            _ => {
                let msg = format!("Checksum not verified for {}: {}", asset.name, reason);
                log_warning(&msg);
                log(&msg);
                Ok(Verification::Unverified(reason))
            }
        }
    };

    let source = match checksum_source(release, asset) {
        Some(source) => source,
        None if policy == VerifyPolicy::Auto => {
            return Ok(scan_notes(release, asset, computed_hex, log));
        }
        None => return unavailable("release publishes no checksum file".to_string()),
    };

    log(&format!("Downloading checksum {}", source.asset.name));
    let text = match fetch_text(&source.asset.download_url) {
        Ok(text) => text,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => return unavailable(format!("could not fetch {}: {}", source.asset.name, e)),
    };

    let entries = parse_checksum_file(&text);
    let expected = entries.get(&asset.name).cloned().or_else(|| {
        // A per-asset file with a single entry speaks for the asset whatever name it lists.
        if !source.manifest && entries.len() == 1 {
            entries.values().next().cloned()
        } else {
            None
        }
    });

    let Some(expected) = expected else {
        return unavailable(format!("{} has no entry for it", source.asset.name));
    };

    if digests_match(&expected, computed_hex) {
        let msg = format!("Checksum verified for {} ({})", asset.name, source.asset.name);
        log_verify(&msg);
        log(&msg);
        Ok(Verification::Verified(source.asset.name.clone()))
    } else {
        log_verify(&format!(
            "Checksum mismatch for {} at {}",
            asset.name,
            path.display()
        ));
        Err(InstallError::ChecksumMismatch {
            asset: asset.name.clone(),
            expected: expected.to_ascii_lowercase(),
            actual: computed_hex.to_ascii_lowercase(),
        })
    }
}

struct ChecksumSource<'a> {
    asset: &'a Asset,
    manifest: bool,
}

fn checksum_source<'a>(release: &'a Release, asset: &Asset) -> Option<ChecksumSource<'a>> {
    CHECKSUM_SUFFIXES
        .iter()
        .find_map(|suffix| release.asset_named(&format!("{}{}", asset.name, suffix)))
        .map(|a| ChecksumSource {
            asset: a,
            manifest: false,
        })
        .or_else(|| {
            MANIFEST_NAMES
                .iter()
                .find_map(|name| release.asset_named(name))
                .map(|a| ChecksumSource {
                    asset: a,
                    manifest: true,
                })
        })
}

/// Parse `<hex>  [*]<name>` lines into name -> hex. A lone hash line maps to an empty name.
pub fn parse_checksum_file(text: &str) -> HashMap<String, String> {
    let mut entries = HashMap::new();
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let Some(hash) = fields.next() else { continue };
        if !is_sha256_hex(hash) {
            continue;
        }
        let name = fields
            .last()
            .map(|n| n.trim_start_matches('*'))
            .map(|n| n.rsplit('/').next().unwrap_or(n))
            .unwrap_or("");
        entries.insert(name.to_string(), hash.to_string());
    }
    entries
}

fn digests_match(expected: &str, actual: &str) -> bool {
    let expected = expected.trim();
    let actual = actual.trim();
    expected.len() == SHA256_HEX_LEN && expected.eq_ignore_ascii_case(actual)
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == SHA256_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Best-effort lookup of a digest quoted in the release notes near the filename.
fn scan_notes(release: &Release, asset: &Asset, computed_hex: &str, log: &dyn Fn(&str)) -> Verification {
    let tokens = notes_tokens(&release.notes, &asset.name);

    if tokens.iter().any(|t| digests_match(t, computed_hex)) {
        let msg = format!("Checksum verified for {} (release notes)", asset.name);
        log_verify(&msg);
        log(&msg);
        return Verification::Verified("release notes".to_string());
    }

    let reason = if tokens.is_empty() {
        "no checksum published".to_string()
    } else {
        "release notes list a different digest (not authoritative)".to_string()
    };
    let msg = format!("Checksum not verified for {}: {}", asset.name, reason);
    log_warning(&msg);
    log(&msg);
    Verification::Unverified(reason)
}

/// 64-hex tokens within the window around each mention of `name`.
fn notes_tokens(notes: &str, name: &str) -> Vec<String> {
    if name.is_empty() {
        return Vec::new();
    }
    let haystack = notes.to_ascii_lowercase();
    let needle = name.to_ascii_lowercase();

    let mut tokens = Vec::new();
    for (pos, _) in haystack.match_indices(&needle) {
        let start = floor_boundary(notes, pos.saturating_sub(NOTES_WINDOW));
        let end = ceil_boundary(notes, (pos + needle.len() + NOTES_WINDOW).min(notes.len()));
        for token in notes[start..end].split(|c: char| !c.is_ascii_hexdigit()) {
            if is_sha256_hex(token) && !tokens.iter().any(|t: &String| t == token) {
                tokens.push(token.to_string());
            }
        }
    }
    tokens
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
