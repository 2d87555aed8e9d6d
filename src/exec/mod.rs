// src/exec/mod.rs

//! Job execution layer.
//!
//! - [`executor`] runs job processes concurrently and hands back finished
//!   runs in completion order.
//! - [`monitor`] drains finished runs into the job store.

pub mod executor;
pub mod monitor;

use thiserror::Error;

use crate::jobs::RunId;

pub use executor::JobExecutor;
pub use monitor::Monitor;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("run {0} is not registered with the executor")]
    NotFound(RunId),

    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("executor completion channel closed")]
    Closed,

    #[error("wait for a completed run was interrupted")]
    Interrupted,
}
