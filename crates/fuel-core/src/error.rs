//! Error kinds owned by `fuel-core`: configuration, spawn, and IPC port
//! concerns. Store-level errors (`NotFound`, `AmbiguousId`,
//! `ValidationError`, `CycleDetected`) come from [`fuel_store::Error`]
//! and are wrapped through unchanged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to spawn agent for task {task_id}: {message}")]
    SpawnFailed { task_id: String, message: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] fuel_store::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
