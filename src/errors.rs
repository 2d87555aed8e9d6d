// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::calendar::ScheduleError;
use crate::dag::BuildError;
use crate::exec::ExecutorError;
use crate::jobs::StoreError;

#[derive(Error, Debug)]
pub enum JobdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid schedule '{name}': {source}")]
    Schedule {
        name: String,
        #[source]
        source: ScheduleError,
    },

    #[error("Invalid process '{process}': {source}")]
    Build {
        process: String,
        #[source]
        source: BuildError,
    },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for JobdagError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound(name) => JobdagError::JobNotFound(name),
            other => JobdagError::Store(other),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, JobdagError>;
