// src/lib.rs

pub mod actions;
pub mod calendar;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod jobs;
pub mod logging;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::calendar::ScheduleSet;
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, ConfigSection};
use crate::dag::{Combinator, Condition, ScopeId, TaskGraph};
use crate::engine::{Engine, EngineSettings};
use crate::exec::{JobExecutor, Monitor};
use crate::jobs::{JobManager, JobScheduler, JobStore, MemoryStore, RunStatus, SchedulerSettings};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - store, engine, executor and job manager
/// - either a single on-demand job run, or the schedule loops plus monitor
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config from '{}'", args.config))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let ConfigFile {
        config,
        schedules,
        processes,
        jobs,
    } = cfg;

    let processes = Arc::new(processes);
    let store = Arc::new(MemoryStore::with_jobs(jobs));
    let engine = Engine::with_settings(
        Arc::clone(&processes),
        EngineSettings {
            sleep_granularity: config.sleep_granularity(),
            log_sink: None,
        },
    );
    let executor = JobExecutor::new(engine);
    let manager = Arc::new(JobManager::new(
        store.clone(),
        processes,
        executor.clone(),
    ));

    match args.job {
        Some(name) => run_single_job(&manager, &executor, store.as_ref(), &name).await,
        None => serve(config, schedules, store, manager, executor).await,
    }
}

/// Run one job to completion; fail unless it succeeded.
async fn run_single_job(
    manager: &JobManager,
    executor: &JobExecutor,
    store: &dyn JobStore,
    name: &str,
) -> Result<()> {
    let run = manager.run(name)?;
    let id = run.id();

    let finished = tokio::select! {
        done = executor.get_completed() => done?,
        _ = tokio::signal::ctrl_c() => {
            warn!(run_id = id, "Ctrl-C received; stopping run");
            manager.stop(id)?;
            executor.get_completed().await?
        }
    };

    let snapshot = finished.snapshot();
    if let Err(err) = store.save_run(&snapshot) {
        warn!(run_id = id, error = %err, "failed to persist run");
    }

    match snapshot.status {
        RunStatus::Succeeded => {
            info!(run_id = id, job = %name, "job succeeded");
            Ok(())
        }
        status => match snapshot.message {
            Some(message) => bail!("job '{name}' {status}: {message}"),
            None => bail!("job '{name}' {status}"),
        },
    }
}

/// Run the schedule loops until Ctrl-C, then tear everything down.
async fn serve(
    config: ConfigSection,
    schedules: BTreeMap<String, ScheduleSet>,
    store: Arc<MemoryStore>,
    manager: Arc<JobManager>,
    executor: JobExecutor,
) -> Result<()> {
    let monitor = Monitor::spawn(executor.clone(), store.clone());
    let scheduler = JobScheduler::new(
        manager,
        SchedulerSettings {
            sleep_granularity: config.sleep_granularity(),
            join_timeout: config.join_timeout(),
        },
    );

    let used = schedules_in_use(store.as_ref(), schedules)?;
    if used.is_empty() {
        warn!("no enabled job is bound to a schedule; waiting for Ctrl-C");
    }
    for (name, set) in used {
        scheduler.start(name, set);
    }

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl-C")?;
    info!("shutdown requested");

    scheduler.stop_all();
    executor.stop_all();
    let drained = executor.close(config.close_timeout()).await;
    monitor.shutdown(&executor, config.close_timeout()).await;

    info!(drained, "jobdag stopped");
    Ok(())
}

/// Schedules referenced by at least one enabled job.
fn schedules_in_use(
    store: &dyn JobStore,
    mut schedules: BTreeMap<String, ScheduleSet>,
) -> Result<Vec<(String, ScheduleSet)>> {
    let jobs = store.list_jobs()?;
    let mut used = Vec::new();
    for job in jobs.iter().filter(|j| j.enabled) {
        for name in &job.schedules {
            if let Some(set) = schedules.remove(name) {
                used.push((name.clone(), set));
            }
        }
    }
    Ok(used)
}

/// Print schedules with their next occurrence, process task trees and jobs.
fn print_dry_run(cfg: &ConfigFile) {
    let now = chrono::Local::now();

    println!("jobdag dry-run");
    println!("  config.close_timeout_secs = {}", cfg.config.close_timeout_secs);
    println!("  config.sleep_granularity_ms = {}", cfg.config.sleep_granularity_ms);
    println!("  config.join_timeout_secs = {}", cfg.config.join_timeout_secs);
    println!();

    println!("schedules ({}):", cfg.schedules.len());
    for (name, set) in &cfg.schedules {
        let next = set
            .next_from_zoned(&now)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        let immediate = if set.is_immediate() { ", immediate" } else { "" };
        println!("  - {name} ({} entries{immediate}): next {next}", set.schedules().len());
    }
    println!();

    println!("processes ({}):", cfg.processes.len());
    for name in cfg.processes.names() {
        println!("  - {name}");
        if let Some(process) = cfg.processes.get(name) {
            print_tasks(process.graph(), process.graph().root(), 0);
        }
    }
    println!();

    println!("jobs ({}):", cfg.jobs.len());
    for job in &cfg.jobs {
        println!("  - {} -> {}", job.name, job.process);
        if !job.args.is_empty() {
            println!("      args: {:?}", job.args);
        }
        if !job.schedules.is_empty() {
            println!("      schedules: {:?}", job.schedules);
        }
        if let Some(path) = &job.properties {
            println!("      properties: {}", path.display());
        }
        if !job.enabled {
            println!("      enabled: false");
        }
    }

    debug!("dry-run complete (no execution)");
}

fn print_tasks(graph: &TaskGraph, scope: ScopeId, depth: usize) {
    let indent = "  ".repeat(depth + 3);
    for &id in graph.tasks_in(scope) {
        let node = graph.task(id);
        let after = node
            .predecessors
            .iter()
            .map(|p| {
                let cond = match p.condition {
                    Condition::Succeeds => " SUCCEEDS",
                    Condition::Fails => " FAILS",
                    Condition::Completes => "",
                };
                format!("{}{cond}", graph.task(p.task).display_name())
            })
            .collect::<Vec<_>>();
        let joiner = match node.combinator {
            Combinator::And => " AND ",
            Combinator::Or => " OR ",
        };
        if after.is_empty() {
            println!("{indent}{} [{}]", node.display_name(), node.kind.label());
        } else {
            println!(
                "{indent}{} [{}] after {}",
                node.display_name(),
                node.kind.label(),
                after.join(joiner)
            );
        }
        if let Some(child) = node.child {
            print_tasks(graph, child, depth + 1);
        }
    }
}
