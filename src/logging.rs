//! kitup logging
//!
//! Timestamped log file per run with a host information header. Messages
//! logged before [`init_logger`] are dropped.

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Mutex, OnceLock};

static LOGGER: OnceLock<Mutex<KitupLogger>> = OnceLock::new();

// ============================================================================
// Host Information
// ============================================================================

#[derive(Debug, Clone)]
pub struct HostInfo {
    pub app_version: String,
    pub os: String,
    pub arch: String,
    pub distro: String,
    pub kernel: String,
    pub shell: String,
}

impl HostInfo {
    pub fn detect() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            distro: detect_distro(),
            kernel: detect_kernel(),
            shell: std::env::var("SHELL").unwrap_or_else(|_| "Unknown".to_string()),
        }
    }

    pub fn to_log_header(&self) -> String {
        format!(
r#"================================================================================
kitup Log - {}
================================================================================
Application:   kitup v{}
Host:
  Platform:    {}/{}
  Distro:      {}
  Kernel:      {}
  Shell:       {}
================================================================================
"#,
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.app_version,
            self.os,
            self.arch,
            self.distro,
            self.kernel,
            self.shell
        )
    }
}

fn detect_distro() -> String {
    if let Ok(file) = File::open("/etc/os-release") {
        let reader = BufReader::new(file);
        for line in reader.lines().map_while(Result::ok) {
            if let Some(name) = line.strip_prefix("PRETTY_NAME=") {
                return name.trim_matches('"').to_string();
            }
        }
    }

    if let Ok(output) = Command::new("sw_vers").arg("-productVersion").output() {
        if output.status.success() {
            return format!("macOS {}", String::from_utf8_lossy(&output.stdout).trim());
        }
    }

    "Unknown".to_string()
}

fn detect_kernel() -> String {
    if let Ok(output) = Command::new("uname").arg("-r").output() {
        if output.status.success() {
            return String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
    }
    "Unknown".to_string()
}

// ============================================================================
// Log Levels
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Info,
    Download,
    Install,
    Verify,
    Warning,
    Error,
}

impl LogLevel {
    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Info => "[INFO]",
            LogLevel::Download => "[DOWNLOAD]",
            LogLevel::Install => "[INSTALL]",
            LogLevel::Verify => "[VERIFY]",
            LogLevel::Warning => "[WARNING]",
            LogLevel::Error => "[ERROR]",
        }
    }
}

// ============================================================================
// kitup Logger
// ============================================================================

pub struct KitupLogger {
    log_file: Option<File>,
    log_path: Option<PathBuf>,
    console: bool,
}

impl KitupLogger {
    pub fn new(console: bool) -> Self {
        let log_dir = kitup_path!("logs");
        let _ = fs::create_dir_all(&log_dir);

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let log_path = log_dir.join(format!("kitup_{}.log", timestamp));

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok();

        let mut logger = Self {
            log_path: log_file.as_ref().map(|_| log_path),
            log_file,
            console,
        };

        let header = HostInfo::detect().to_log_header();
        if let Some(ref mut file) = logger.log_file {
            let _ = writeln!(file, "{}", header);
        }

        logger
    }

    fn write_raw(&mut self, level: LogLevel, msg: &str) {
        if let Some(ref mut file) = self.log_file {
            let _ = writeln!(file, "{}", msg);
            let _ = file.flush();
        }

        if self.console {
            match level {
                LogLevel::Warning | LogLevel::Error => eprintln!("{}", msg),
                _ => println!("{}", msg),
            }
        }
    }

    pub fn log(&mut self, level: LogLevel, message: &str) {
        let timestamp = Local::now().format("%H:%M:%S");
        let formatted = format!("[{}] {} {}", timestamp, level.prefix(), message);
        self.write_raw(level, &formatted);
    }
}

// ============================================================================
// Global Logger Access
// ============================================================================

/// Initialize the global logger (call once at startup)
pub fn init_logger(console: bool) {
    LOGGER.get_or_init(|| Mutex::new(KitupLogger::new(console)));
}

/// Path of the current run's log file, if logging was initialized.
pub fn log_file_path() -> Option<PathBuf> {
    LOGGER
        .get()
        .and_then(|l| l.lock().ok().and_then(|log| log.log_path.clone()))
}

fn log(level: LogLevel, message: &str) {
    if let Some(logger) = LOGGER.get() {
        if let Ok(mut log) = logger.lock() {
            log.log(level, message);
        }
    }
}

// ============================================================================
// Convenience Logging Functions
// ============================================================================

pub fn log_info(message: &str) {
    log(LogLevel::Info, message);
}

pub fn log_download(message: &str) {
    log(LogLevel::Download, message);
}

pub fn log_install(message: &str) {
    log(LogLevel::Install, message);
}

pub fn log_verify(message: &str) {
    log(LogLevel::Verify, message);
}

pub fn log_warning(message: &str) {
    log(LogLevel::Warning, message);
}

pub fn log_error(message: &str) {
    log(LogLevel::Error, message);
}
