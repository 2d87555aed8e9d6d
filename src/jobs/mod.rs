// src/jobs/mod.rs

//! Jobs, runs and everything that starts them.
//!
//! - [`model`] defines jobs and runs.
//! - [`store`] persists them.
//! - [`manager`] starts and stops runs on the executor.
//! - [`scheduler`] starts runs on schedule.

pub mod manager;
pub mod model;
pub mod scheduler;
pub mod store;

pub use manager::JobManager;
pub use model::{Job, Run, RunId, RunRef, RunStatus};
pub use scheduler::{JobScheduler, SchedulerSettings};
pub use store::{JobStore, MemoryStore, StoreError};
