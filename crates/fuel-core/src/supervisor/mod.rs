//! Process supervisor (C6).

mod process;

pub use process::{Completion, CompletionType, ProcessHandle, SpawnResult, Supervisor};
