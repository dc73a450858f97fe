//! Error kinds for the task/epic/run store.
//!
//! Each kind carries an actionable message rather than a language
//! default (`Display` always explains what went wrong and, where
//! useful, what to do about it).

use thiserror::Error;

/// A short id candidate produced while resolving an ambiguous prefix.
pub type Candidate = String;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no record found for id '{0}'")]
    NotFound(String),

    #[error("id prefix '{prefix}' matches multiple records: {candidates:?}")]
    AmbiguousId {
        prefix: String,
        candidates: Vec<Candidate>,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("adding dependency {from} -> {to} would create a cycle")]
    CycleDetected { from: String, to: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
