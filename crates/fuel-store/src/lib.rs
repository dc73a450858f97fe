//! File-backed persistence for tasks, epics, and runs.
//!
//! Each repository owns one JSONL file under `.fuel/`, guarded by an
//! advisory lock so a supervisor and a CLI invocation can share the
//! store safely from separate processes.

pub mod epics;
pub mod error;
pub mod id;
mod jsonl;
mod lock;
pub mod model;
mod resolve;
pub mod runs;
pub mod tasks;

pub use epics::{EpicCreate, EpicUpdate, FileEpicRepository};
pub use error::{Error, Result};
pub use model::{
    compute_epic_status, Complexity, Epic, EpicStatus, Priority, Run, RunStatus, Size, Task,
    TaskStatus, TaskType,
};
pub use runs::{FileRunRepository, RunCreate, RunUpdate};
pub use tasks::{is_failed, FileTaskRepository, TaskCreate, TaskUpdate};

/// The standard on-disk layout rooted at a repository's `.fuel/` directory.
pub struct Store {
    pub tasks: FileTaskRepository,
    pub epics: FileEpicRepository,
    pub runs: FileRunRepository,
}

impl Store {
    /// Open (without creating) the store rooted at `fuel_dir` (typically
    /// `<repo>/.fuel`).
    pub fn open(fuel_dir: impl AsRef<std::path::Path>) -> Self {
        let fuel_dir = fuel_dir.as_ref();
        Self {
            tasks: FileTaskRepository::new(fuel_dir.join("tasks.jsonl")),
            epics: FileEpicRepository::new(fuel_dir.join("epics.jsonl")),
            runs: FileRunRepository::new(fuel_dir.join("runs.jsonl")),
        }
    }
}
