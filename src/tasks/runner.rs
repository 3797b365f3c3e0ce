//! Sequential task execution with resume support

use std::time::Instant;

use super::{Task, TaskFailure, TaskRunState};
use crate::error::InstallError;
use crate::installers::TaskContext;
use crate::logging::{log_error, log_info};

/// Run every task from the start with a fresh state.
pub fn run_all(tasks: &[Task], ctx: &TaskContext) -> Result<TaskRunState, TaskFailure> {
    let mut state = TaskRunState::default();
    run_from(tasks, &mut state, 0, ctx)?;
    Ok(state)
}

/// Run `tasks[start..]` in order, stopping at the first failure.
///
/// Progress is reported as `(completed, total)` once at the start point and
/// after every task that succeeds.
pub fn run_from(
    tasks: &[Task],
    state: &mut TaskRunState,
    start: usize,
    ctx: &TaskContext,
) -> Result<(), TaskFailure> {
    let total = tasks.len();
    let start = start.min(total);
    ctx.set_progress(start, total);

    for (index, task) in tasks.iter().enumerate().skip(start) {
        if ctx.is_cancelled() {
            ctx.log(format!("[CANCELLED] {}", task.name));
            log_info(&format!("Run cancelled before step {} ({})", index + 1, task.name));
            return Err(TaskFailure {
                index,
                name: task.name.clone(),
                error: InstallError::Cancelled,
            });
        }

        ctx.log(format!("==> [{}/{}] {}", index + 1, total, task.name));
        ctx.set_status(task.name.clone());
        log_info(&format!("Starting step {}/{}: {}", index + 1, total, task.name));
        let started = Instant::now();

        if let Err(error) = task.run(ctx, state) {
            ctx.log(format!("[FAILED] {}: {}", task.name, error));
            log_error(&format!("Step {} ({}) failed: {}", index + 1, task.name, error));
            return Err(TaskFailure {
                index,
                name: task.name.clone(),
                error,
            });
        }

        let elapsed = started.elapsed().as_secs_f64();
        ctx.log(format!("[OK] {} ({:.2}s)", task.name, elapsed));
        log_info(&format!("Finished {} in {:.2}s", task.name, elapsed));
        ctx.set_progress(index + 1, total);
    }

    Ok(())
}
