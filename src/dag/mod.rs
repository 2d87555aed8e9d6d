// src/dag/mod.rs

//! Task graphs of a process.
//!
//! - [`task`] defines task identities, kinds, conditions and results.
//! - [`after`] parses AFTER clauses.
//! - [`predicate`] decides whether a task is ready, waiting or orphaned.
//! - [`graph`] is the immutable arena of tasks and nested scopes.
//! - [`builder`] lowers [`TaskSpec`]s into a validated [`TaskGraph`].

pub mod after;
pub mod builder;
pub mod graph;
pub mod predicate;
pub mod task;

use thiserror::Error;

pub use after::{AfterClause, parse_after};
pub use builder::{TaskSpec, build_graph};
pub use graph::{ScopeNode, TaskGraph};
pub use predicate::{Verdict, evaluate};
pub use task::{
    Combinator, Condition, Invocation, Predecessor, ScopeId, TaskId, TaskKind, TaskNode,
    TaskResult,
};

/// Structural errors detected while building a process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("task '{task}' has a malformed AFTER clause: {reason}")]
    MalformedAfter { task: String, reason: String },

    #[error("task '{task}' mixes AND and OR in its AFTER clause")]
    MixedCombinators { task: String },

    #[error("task '{task}' refers to unknown predecessor '{predecessor}'")]
    UnknownPredecessor { task: String, predecessor: String },

    #[error("task '{task}' cannot be its own predecessor")]
    SelfPredecessor { task: String },

    #[error("duplicate task name '{name}' in the same scope")]
    DuplicateTask { name: String },

    #[error("predecessor cycle involving task '{task}'")]
    Cycle { task: String },

    #[error("BREAK task '{task}' is not inside a loop or group")]
    BreakOutsideLoop { task: String },

    #[error("task '{task}' has nested tasks but is not a loop or group")]
    ChildrenOnLeaf { task: String },

    #[error("WAITFOR ASYNC task '{task}' is ambiguous: '{via}' combines its predecessors with OR")]
    AmbiguousWaitFor { task: String, via: String },

    #[error("WAITFOR ASYNC task '{task}' has no asynchronous launch to wait for")]
    NoAsyncLaunch { task: String },
}
