// src/actions/command.rs

//! Shell command action.

use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::engine::{Action, ActionError, ActionFuture, TaskContext};

/// Runs a command line through the platform shell.
///
/// The child sees the process variables as environment variables, the
/// positional arguments as `JOBDAG_ARG_1`, `JOBDAG_ARG_2`, ... and, when a
/// predecessor failed, its message as `ERROR_MESSAGE`. A non-zero exit code
/// fails the task. The child is killed when the process stops.
#[derive(Debug, Clone)]
pub struct CommandAction {
    cmd: String,
}

impl CommandAction {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<(), ActionError> {
        let task = ctx.task_path();
        info!(task = %task, cmd = %self.cmd, "starting command");

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        for (name, value) in ctx.variables().snapshot() {
            cmd.env(name, value.to_string());
        }
        for (i, arg) in ctx.args().iter().enumerate() {
            cmd.env(format!("JOBDAG_ARG_{}", i + 1), arg.to_string());
        }
        if let Some(message) = ctx.error_message() {
            cmd.env("ERROR_MESSAGE", message);
        }

        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning command for task '{task}'"))?;

        if let Some(stdout) = child.stdout.take() {
            let task = task.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(task = %task, "stdout: {}", line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let task = task.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(task = %task, "stderr: {}", line);
                }
            });
        }

        tokio::select! {
            status = child.wait() => {
                let status = status
                    .with_context(|| format!("waiting for command of task '{task}'"))?;
                let code = status.code().unwrap_or(-1);
                info!(task = %task, exit_code = code, success = status.success(), "command exited");
                if status.success() {
                    Ok(())
                } else {
                    Err(ActionError::new(format!("command exited with code {code}")))
                }
            }
            _ = ctx.cancellation().cancelled() => {
                info!(task = %task, "process stopping; killing command");
                if let Err(e) = child.kill().await {
                    warn!(task = %task, error = %e, "failed to kill command");
                }
                Err(ActionError::new("command killed"))
            }
        }
    }
}

impl Action for CommandAction {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> ActionFuture<'a> {
        Box::pin(self.execute(ctx))
    }
}
