//! Ordered setup tasks and their execution

mod config_backup;
mod config_write;
mod plan;
mod runner;
mod session;
mod sync;

pub use config_backup::{
    back_up_dir, list_backups, restore_backup, BackupMeta, ConfigBackup, BACKUP_META_FILE, REASON_PRE_RESTORE,
    REASON_REPLACE_UNMANAGED,
};
pub use config_write::{read_marker, ConfigMarker, ConfigWriter, TemplateConfigWriter, HEADLESS_INIT, MARKER_FILE};
pub use plan::{plan, Planner};
pub use runner::{run_all, run_from};
pub use session::{ApplySession, RunEvent, RunGuard, RunToken};
pub use sync::sync_plugins;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::InstallError;
use crate::installers::TaskContext;
use crate::platform::Tool;

pub type TaskFn = Box<dyn Fn(&TaskContext, &mut TaskRunState) -> Result<(), InstallError> + Send + Sync>;

/// One named unit of work in a plan.
pub struct Task {
    pub name: String,
    run: TaskFn,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        run: impl Fn(&TaskContext, &mut TaskRunState) -> Result<(), InstallError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }

    pub fn run(&self, ctx: &TaskContext, state: &mut TaskRunState) -> Result<(), InstallError> {
        (self.run)(ctx, state)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

/// Values tasks hand to later tasks. Lives for one plan execution and any
/// resumptions of it.
#[derive(Debug, Default, Clone)]
pub struct TaskRunState {
    /// Binary path per installed (or already current) tool
    pub installed: HashMap<Tool, PathBuf>,
    /// Editor config directory once written
    pub config_dir: Option<PathBuf>,
}

/// The first task that failed in a run.
#[derive(Debug)]
pub struct TaskFailure {
    pub index: usize,
    pub name: String,
    pub error: InstallError,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step {} ({}) failed: {}", self.index + 1, self.name, self.error)
    }
}

impl std::error::Error for TaskFailure {}
