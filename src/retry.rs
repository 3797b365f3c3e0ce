//! Bounded exponential backoff shared by the release resolver and the downloader

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::InstallError;
use crate::logging::log_warning;

/// How often a backoff sleep looks at the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before `attempt` (1-based). The first attempt never waits;
    /// after that the base delay doubles each time.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let shift = (attempt - 2).min(16);
        self.base_delay.saturating_mul(1u32 << shift)
    }

    /// Run `op` until it succeeds, fails terminally, or the attempt ceiling is hit.
    pub fn run<T>(
        &self,
        cancel: &AtomicBool,
        what: &str,
        op: impl FnMut(u32) -> Result<T, InstallError>,
    ) -> Result<T, InstallError> {
        self.run_with_sleep(cancel, what, op, sleep_cancellable)
    }

    /// Same as [`RetryPolicy::run`] with an injectable sleeper.
    pub fn run_with_sleep<T>(
        &self,
        cancel: &AtomicBool,
        what: &str,
        mut op: impl FnMut(u32) -> Result<T, InstallError>,
        mut sleep: impl FnMut(Duration, &AtomicBool) -> Result<(), InstallError>,
    ) -> Result<T, InstallError> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(InstallError::Cancelled);
            }
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                sleep(delay, cancel)?;
            }

            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    log_warning(&format!(
                        "{} failed (attempt {}/{}): {}",
                        what, attempt, max_attempts, e
                    ));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Sleep for `duration`, returning early with `Cancelled` if the flag is raised.
pub fn sleep_cancellable(duration: Duration, cancel: &AtomicBool) -> Result<(), InstallError> {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(InstallError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}
