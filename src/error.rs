//! Error type shared by the installation pipeline and the task runner

use std::io;
use std::path::Path;

// ============================================================================
// Install Errors
// ============================================================================

/// Every failure the pipeline can surface to a task.
#[derive(Debug)]
pub enum InstallError {
    /// The run was cancelled
    Cancelled,
    /// Transport failure reaching the API or download host
    Network { url: String, reason: String },
    /// Non-2xx response
    HttpStatus { url: String, code: u16 },
    /// Response body could not be decoded
    Decode { url: String, reason: String },
    /// No platform table row for this OS/architecture/tool
    UnsupportedPlatform { tool: String, os: String, arch: String },
    /// The release has no asset for this platform
    AssetNotFound { tool: String, tag: String, platform: String },
    /// No usable checksum source
    ChecksumUnavailable { asset: String, reason: String },
    /// Checksum source disagrees with the downloaded bytes
    ChecksumMismatch { asset: String, expected: String, actual: String },
    /// Malformed archive or unsafe entry
    Extraction { archive: String, reason: String },
    /// Expected binary missing from the unpacked tree
    BinaryNotFound { name: String, root: String },
    /// IO failure while placing or publishing files
    Filesystem { context: String, reason: String },
    /// Generic error with context
    Other { context: String, reason: String },
}

impl InstallError {
    /// Retryable errors are retried inside the resolver and downloader.
    pub fn is_retryable(&self) -> bool {
        match self {
            InstallError::Network { .. } => true,
            InstallError::HttpStatus { code, .. } => is_retryable_status(*code),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, InstallError::Cancelled)
    }

    /// Build a closure that maps an `io::Error` to a filesystem error with context.
    pub fn fs(context: impl Into<String>) -> impl FnOnce(io::Error) -> InstallError {
        let context = context.into();
        move |e| InstallError::Filesystem {
            context,
            reason: e.to_string(),
        }
    }

    /// Same as [`InstallError::fs`] with the path appended to the context.
    pub fn fs_at(action: &str, path: &Path) -> impl FnOnce(io::Error) -> InstallError {
        Self::fs(format!("{} {}", action, path.display()))
    }
}

/// 5xx and 429 are transient; every other status is terminal.
pub fn is_retryable_status(code: u16) -> bool {
    code >= 500 || code == 429
}

impl std::fmt::Display for InstallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallError::Cancelled => write!(f, "Cancelled"),
            InstallError::Network { url, reason } => {
                write!(f, "Network error fetching {}: {}", url, reason)
            }
            InstallError::HttpStatus { url, code } => {
                write!(f, "HTTP {} from {}", code, url)
            }
            InstallError::Decode { url, reason } => {
                write!(f, "Invalid response from {}: {}", url, reason)
            }
            InstallError::UnsupportedPlatform { tool, os, arch } => {
                write!(f, "{} is not available for {}/{}", tool, os, arch)
            }
            InstallError::AssetNotFound { tool, tag, platform } => {
                write!(f, "{} {} has no release asset for {}", tool, tag, platform)
            }
            InstallError::ChecksumUnavailable { asset, reason } => {
                write!(f, "Checksum not available for {}: {}", asset, reason)
            }
            InstallError::ChecksumMismatch {
                asset,
                expected,
                actual,
            } => write!(
                f,
                "Checksum mismatch for {}: expected {}, got {}",
                asset, expected, actual
            ),
            InstallError::Extraction { archive, reason } => {
                write!(f, "Failed to extract {}: {}", archive, reason)
            }
            InstallError::BinaryNotFound { name, root } => {
                write!(f, "{} not found under {}", name, root)
            }
            InstallError::Filesystem { context, reason } => {
                write!(f, "Failed to {}: {}", context, reason)
            }
            InstallError::Other { context, reason } => write!(f, "{}: {}", context, reason),
        }
    }
}

impl std::error::Error for InstallError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let status = |code| InstallError::HttpStatus {
            url: "u".into(),
            code,
        };
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(InstallError::Network {
            url: "u".into(),
            reason: "reset".into()
        }
        .is_retryable());
        assert!(!InstallError::Cancelled.is_retryable());
        assert!(!InstallError::ChecksumMismatch {
            asset: "a".into(),
            expected: "x".into(),
            actual: "y".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_fs_context_in_message() {
        let err = InstallError::fs("create bin dir")(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert_eq!(err.to_string(), "Failed to create bin dir: denied");
    }
}
