//! Streaming downloader with SHA-256 hashing and atomic placement

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use sha2::{Digest, Sha256};

use crate::error::InstallError;
use crate::http::{self, Timeouts};
use crate::logging::log_download;
use crate::retry::RetryPolicy;

/// A finished download. `sha256_hex` is the digest of exactly the bytes at `path`.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub sha256_hex: String,
    pub bytes: u64,
}

pub struct Downloader {
    agent: ureq::Agent,
    text_agent: ureq::Agent,
    retry: RetryPolicy,
}

impl Downloader {
    pub fn new(timeouts: &Timeouts, retry: RetryPolicy) -> Self {
        Self {
            agent: http::download_agent(timeouts),
            text_agent: http::api_agent(timeouts),
            retry,
        }
    }

    pub fn download(&self, url: &str, dest: &Path, cancel: &AtomicBool) -> Result<DownloadResult, InstallError> {
        self.download_with_progress(url, dest, cancel, &|_, _| {})
    }

    /// Download `url` to `dest`. Bytes go to `<dest>.part` first and are renamed
    /// into place only once complete; on failure `dest` is left untouched.
    pub fn download_with_progress(
        &self,
        url: &str,
        dest: &Path,
        cancel: &AtomicBool,
        progress: &dyn Fn(u64, u64),
    ) -> Result<DownloadResult, InstallError> {
        let part = part_path(dest);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(InstallError::fs_at("create", parent))?;
        }

        log_download(&format!("Fetching {}", url));
        let result = self.retry.run(cancel, "Download", |_| {
            let outcome = self.fetch_to_part(url, &part, cancel, progress);
            if outcome.is_err() {
                let _ = fs::remove_file(&part);
            }
            outcome
        });

        let (sha256_hex, bytes) = match result {
            Ok(v) => v,
            Err(e) => {
                let _ = fs::remove_file(&part);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&part, dest) {
            let _ = fs::remove_file(&part);
            return Err(InstallError::fs_at("move download to", dest)(e));
        }

        log_download(&format!("Saved {} ({} bytes)", dest.display(), bytes));
        Ok(DownloadResult {
            path: dest.to_path_buf(),
            sha256_hex,
            bytes,
        })
    }

    fn fetch_to_part(
        &self,
        url: &str,
        part: &Path,
        cancel: &AtomicBool,
        progress: &dyn Fn(u64, u64),
    ) -> Result<(String, u64), InstallError> {
        let response = http::get(&self.agent, url, None)?;

        let total_size = response
            .header("Content-Length")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        let mut file = File::create(part).map_err(InstallError::fs_at("create", part))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];
        let mut downloaded: u64 = 0;
        let mut reader = response.into_reader();

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(InstallError::Cancelled);
            }
            let bytes_read = reader.read(&mut buffer).map_err(|e| InstallError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            if bytes_read == 0 {
                break;
            }
            file.write_all(&buffer[..bytes_read])
                .map_err(InstallError::fs_at("write", part))?;
            hasher.update(&buffer[..bytes_read]);
            downloaded += bytes_read as u64;

            if total_size > 0 {
                progress(downloaded, total_size);
            }
        }

        if total_size > 0 && downloaded != total_size {
            return Err(InstallError::Network {
                url: url.to_string(),
                reason: format!("short read: {} of {} bytes", downloaded, total_size),
            });
        }

        file.sync_all().map_err(InstallError::fs_at("sync", part))?;
        Ok((format!("{:x}", hasher.finalize()), downloaded))
    }

    /// Fetch a small text document such as a checksum file.
    pub fn read_text(&self, url: &str, cancel: &AtomicBool) -> Result<String, InstallError> {
        self.retry.run(cancel, "Fetch", |_| {
            http::get(&self.text_agent, url, None)?
                .into_string()
                .map_err(|e| InstallError::Network {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
        })
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
