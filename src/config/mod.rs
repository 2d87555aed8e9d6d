// src/config/mod.rs

//! Configuration loading and validation for jobdag.
//!
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Build and validate schedules, processes and jobs (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_properties};
pub use model::{ConfigFile, ConfigSection, JobConfig, ProcessConfig, RawConfigFile, TaskConfig};
