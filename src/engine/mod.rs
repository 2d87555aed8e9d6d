// src/engine/mod.rs

//! Process execution engine.
//!
//! A [`Process`] is a built task graph. The [`Engine`] executes processes:
//! every task runs as its own tokio task once its predecessor expression is
//! satisfied, loops and groups run their child scope through the same
//! dispatch loop, and STOP is delivered as cooperative cancellation.
//!
//! Leaf work is done by [`Action`]s, FOR loops pull rows from a
//! [`RowSource`]; both are supplied by collaborators.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

pub mod context;
pub mod process;
pub mod runner;
pub mod scope;
pub mod value;

pub use context::{LogSink, TaskContext};
pub use process::{Process, ProcessOutcome, ProcessRegistry, ProcessStatus};
pub use runner::{Engine, EngineSettings};
pub use value::{BoolExpr, EvalContext, Expr, Row, Value, ValueExpr, Variables};

/// Failure reported by an action, a row source or an expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ActionError {
    message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        ActionError::new(format!("{err:#}"))
    }
}

impl From<std::io::Error> for ActionError {
    fn from(err: std::io::Error) -> Self {
        ActionError::new(err.to_string())
    }
}

pub type ActionFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ActionError>> + Send + 'a>>;

/// Opaque leaf behaviour of a task.
///
/// An action that runs for a while should watch
/// [`TaskContext::cancellation`]; the engine also abandons the future when
/// the process stops.
pub trait Action: Send + Sync + fmt::Debug {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> ActionFuture<'a>;
}

pub type CursorFuture<'a> = Pin<Box<dyn Future<Output = Result<Box<dyn RowCursor>, ActionError>> + Send + 'a>>;
pub type RowFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<Row>, ActionError>> + Send + 'a>>;

/// Where a FOR loop gets its rows from.
pub trait RowSource: Send + Sync + fmt::Debug {
    fn open<'a>(&'a self, ctx: &'a TaskContext) -> CursorFuture<'a>;
}

/// An open row stream; `None` ends the loop.
pub trait RowCursor: Send {
    fn next_row(&mut self) -> RowFuture<'_>;
}

/// Fixed rows, handy for literal FOR loops.
#[derive(Debug, Clone, Default)]
pub struct StaticRows {
    rows: Vec<Row>,
}

impl StaticRows {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

impl RowSource for StaticRows {
    fn open<'a>(&'a self, _ctx: &'a TaskContext) -> CursorFuture<'a> {
        let rows = self.rows.clone().into_iter();
        Box::pin(async move { Ok(Box::new(StaticCursor { rows }) as Box<dyn RowCursor>) })
    }
}

struct StaticCursor {
    rows: std::vec::IntoIter<Row>,
}

impl RowCursor for StaticCursor {
    fn next_row(&mut self) -> RowFuture<'_> {
        let row = self.rows.next();
        Box::pin(async move { Ok(row) })
    }
}
