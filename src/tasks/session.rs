//! Background runs for a front-end: one worker thread per run, events over a channel

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use super::runner::run_from;
use super::{Task, TaskFailure, TaskRunState};
use crate::installers::TaskContext;
use crate::logging::log_warning;

// ============================================================================
// Single-run guard
// ============================================================================

/// Allows at most one active run.
#[derive(Clone, Default)]
pub struct RunGuard {
    active: Arc<AtomicBool>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another run holds the guard.
    pub fn try_acquire(&self) -> Option<RunToken> {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunToken {
                active: Arc::clone(&self.active),
            })
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Held for the duration of a run; releases the guard on drop.
pub struct RunToken {
    active: Arc<AtomicBool>,
}

impl Drop for RunToken {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// Apply Session
// ============================================================================

/// Posted by the worker thread to the foreground.
#[derive(Debug)]
pub enum RunEvent {
    Status(String),
    Log(String),
    Progress { completed: usize, total: usize },
    /// Always the last event of a run
    Finished(Result<(), TaskFailure>),
}

/// Keeps a plan, its shared state and the failed index between runs so a
/// failed step can be retried without redoing the steps before it.
pub struct ApplySession {
    tasks: Arc<Vec<Task>>,
    state: Arc<Mutex<TaskRunState>>,
    failed: Arc<Mutex<Option<usize>>>,
    guard: RunGuard,
    cancel: Arc<AtomicBool>,
}

impl ApplySession {
    pub fn new(tasks: Vec<Task>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            tasks: Arc::new(tasks),
            state: Arc::new(Mutex::new(TaskRunState::default())),
            failed: Arc::new(Mutex::new(None)),
            guard: RunGuard::new(),
            cancel,
        }
    }

    /// Run the whole plan with a fresh state. `None` if a run is active.
    pub fn start(&self) -> Option<Receiver<RunEvent>> {
        self.spawn(0, true)
    }

    /// Resume from the last failed task, keeping the state earlier tasks
    /// produced. `None` if nothing failed or a run is active.
    pub fn retry_failed(&self) -> Option<Receiver<RunEvent>> {
        let index = (*self.failed.lock())?;
        self.spawn(index, false)
    }

    /// Replace the plan and start over. `None` if a run is active.
    pub fn run_again(&mut self, tasks: Vec<Task>) -> Option<Receiver<RunEvent>> {
        if self.guard.is_running() {
            log_warning("Ignoring new plan while a run is active");
            return None;
        }
        self.tasks = Arc::new(tasks);
        *self.failed.lock() = None;
        self.spawn(0, true)
    }

    pub fn failed_task(&self) -> Option<(usize, String)> {
        let index = (*self.failed.lock())?;
        self.tasks.get(index).map(|t| (index, t.name.clone()))
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name.clone()).collect()
    }

    pub fn state(&self) -> TaskRunState {
        self.state.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn spawn(&self, start: usize, fresh: bool) -> Option<Receiver<RunEvent>> {
        let token = self.guard.try_acquire()?;
        if fresh {
            *self.state.lock() = TaskRunState::default();
        }
        self.cancel.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel();
        let tasks = Arc::clone(&self.tasks);
        let state = Arc::clone(&self.state);
        let failed = Arc::clone(&self.failed);
        let cancel = Arc::clone(&self.cancel);

        thread::spawn(move || {
            let status_tx = tx.clone();
            let log_tx = tx.clone();
            let progress_tx = tx.clone();
            let ctx = TaskContext::new(
                move |msg| {
                    let _ = status_tx.send(RunEvent::Status(msg));
                },
                move |msg| {
                    let _ = log_tx.send(RunEvent::Log(msg));
                },
                move |completed, total| {
                    let _ = progress_tx.send(RunEvent::Progress { completed, total });
                },
                cancel,
            );

            let mut local = state.lock().clone();
            let result = run_from(&tasks, &mut local, start, &ctx);
            *state.lock() = local;
            *failed.lock() = result.as_ref().err().map(|f| f.index);

            drop(token);
            let _ = tx.send(RunEvent::Finished(result));
        });

        Some(rx)
    }
}
