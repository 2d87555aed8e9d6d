// src/engine/scope.rs

//! Groups and loops: DO, DO WHILE, FOR and ON SCHEDULE.
//!
//! Each iteration resets the results of the body and runs it through the
//! normal scope dispatch. A BREAK ends the loop after the iteration it was
//! raised in; a failed iteration ends the loop and fails the loop task.

use std::sync::Arc;

use tracing::debug;

use crate::dag::{ScopeId, TaskKind, TaskNode, TaskResult};
use crate::engine::context::TaskContext;
use crate::engine::runner::{ProcessRun, ScopeOutcome, TaskOutcome};

/// Whether to go round again.
enum Flow {
    Continue,
    Done,
}

impl ProcessRun {
    pub(crate) async fn run_scoped(self: &Arc<Self>, ctx: &TaskContext, node: &TaskNode) -> TaskOutcome {
        let path = self.process.graph().path_of(node.id);
        let Some(body) = node.child else {
            return TaskOutcome::failed(format!("task '{path}' has no body"));
        };

        let mut iterations = 0usize;
        let mut failure: Option<String> = None;

        match &node.kind {
            TaskKind::Group => {
                self.iteration(ctx, body, &mut iterations, &mut failure).await;
            }
            TaskKind::While(condition) => {
                while !ctx.cancellation().is_cancelled() {
                    match ctx.eval(condition) {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(err) => return TaskOutcome::failed(err.to_string()),
                    }
                    if let Flow::Done = self.iteration(ctx, body, &mut iterations, &mut failure).await {
                        break;
                    }
                }
            }
            TaskKind::For { vars, source } => {
                let opened = tokio::select! {
                    _ = ctx.cancellation().cancelled() => return TaskOutcome::of(TaskResult::Orphaned),
                    opened = source.open(ctx) => opened,
                };
                let mut cursor = match opened {
                    Ok(cursor) => cursor,
                    Err(err) => return TaskOutcome::failed(err.to_string()),
                };

                loop {
                    let next = tokio::select! {
                        _ = ctx.cancellation().cancelled() => break,
                        next = cursor.next_row() => next,
                    };
                    let row = match next {
                        Ok(Some(row)) => row,
                        Ok(None) => break,
                        Err(err) => return TaskOutcome::failed(err.to_string()),
                    };
                    for (i, var) in vars.iter().enumerate() {
                        self.vars.set(var.clone(), row.get(i).cloned().unwrap_or_default());
                    }
                    if let Flow::Done = self.iteration(ctx, body, &mut iterations, &mut failure).await {
                        break;
                    }
                }
            }
            TaskKind::OnSchedule(schedules) => {
                let granularity = self.engine.settings().sleep_granularity;
                let mut flow = Flow::Continue;
                if schedules.is_immediate() && !ctx.cancellation().is_cancelled() {
                    flow = self.iteration(ctx, body, &mut iterations, &mut failure).await;
                }
                while let Flow::Continue = flow {
                    if !schedules.sleep_until_next(granularity, ctx.cancellation()).await {
                        break;
                    }
                    flow = self.iteration(ctx, body, &mut iterations, &mut failure).await;
                }
            }
            other => {
                return TaskOutcome::failed(format!(
                    "task '{path}' of kind {} cannot own tasks",
                    other.label()
                ));
            }
        }

        if ctx.cancellation().is_cancelled() {
            return TaskOutcome::of(TaskResult::Orphaned);
        }
        debug!(task = %path, iterations, "loop finished");
        match failure {
            Some(message) => TaskOutcome::failed(message),
            None => TaskOutcome::of(TaskResult::Succeeded),
        }
    }

    async fn iteration(
        self: &Arc<Self>,
        ctx: &TaskContext,
        body: ScopeId,
        iterations: &mut usize,
        failure: &mut Option<String>,
    ) -> Flow {
        self.reset_scope(body);
        let ScopeOutcome { broke, failure: failed } = Arc::clone(self)
            .run_scope(body, ctx.cancellation().clone())
            .await;
        *iterations += 1;

        if let Some(message) = failed {
            *failure = Some(message);
            return Flow::Done;
        }
        if broke || ctx.cancellation().is_cancelled() {
            Flow::Done
        } else {
            Flow::Continue
        }
    }
}
