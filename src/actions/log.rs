// src/actions/log.rs

use crate::engine::{Action, ActionFuture, TaskContext, ValueExpr};

/// Logs a message. Never fails unless the message cannot be evaluated.
#[derive(Debug, Clone)]
pub struct LogAction {
    message: ValueExpr,
}

impl LogAction {
    pub fn new(message: ValueExpr) -> Self {
        Self { message }
    }

    pub fn text(message: impl Into<String>) -> Self {
        Self::new(ValueExpr::text(message))
    }
}

impl Action for LogAction {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> ActionFuture<'a> {
        Box::pin(async move {
            let message = ctx.eval(&self.message)?;
            ctx.log(&message.to_string());
            Ok(())
        })
    }
}
