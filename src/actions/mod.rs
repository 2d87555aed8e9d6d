// src/actions/mod.rs

//! Built-in leaf actions.

pub mod command;
pub mod log;

pub use command::CommandAction;
pub use log::LogAction;
