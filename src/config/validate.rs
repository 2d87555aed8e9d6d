// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, Weekday};

use crate::actions::{CommandAction, LogAction};
use crate::calendar::{
    DateSchedule, LogicalDay, Ordinal, Schedule, ScheduleError, ScheduleSet, TimeSchedule,
};
use crate::config::model::{
    ConfigFile, DateConfig, JobConfig, RawConfigFile, ScheduleConfig, TaskConfig, TaskKindConfig,
    TimeConfig,
};
use crate::dag::{Invocation, TaskKind, TaskSpec};
use crate::engine::{Process, ProcessRegistry, Value, ValueExpr};
use crate::errors::{JobdagError, Result};
use crate::jobs::Job;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = JobdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_processes(&raw)?;
        validate_global_config(&raw)?;

        let schedules = build_schedules(&raw.schedule)?;
        let processes = build_processes(&raw, &schedules)?;
        let jobs = build_jobs(&raw.job, &processes, &schedules)?;

        Ok(ConfigFile {
            config: raw.config,
            schedules,
            processes,
            jobs,
        })
    }
}

fn ensure_has_processes(cfg: &RawConfigFile) -> Result<()> {
    if cfg.process.is_empty() {
        return Err(JobdagError::ConfigError(
            "config must contain at least one [process.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.sleep_granularity_ms == 0 {
        return Err(JobdagError::ConfigError(
            "[config].sleep_granularity_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn build_schedules(
    raw: &BTreeMap<String, Vec<ScheduleConfig>>,
) -> Result<BTreeMap<String, ScheduleSet>> {
    let mut out = BTreeMap::new();
    for (name, entries) in raw {
        if entries.is_empty() {
            return Err(JobdagError::ConfigError(format!(
                "schedule '{name}' has no entries"
            )));
        }
        let mut set = ScheduleSet::default();
        for entry in entries {
            let schedule = build_schedule(entry).map_err(|source| JobdagError::Schedule {
                name: name.clone(),
                source,
            })?;
            set.push(schedule);
        }
        out.insert(name.clone(), set);
    }
    Ok(out)
}

fn build_schedule(entry: &ScheduleConfig) -> std::result::Result<Schedule, ScheduleError> {
    let time = match &entry.time {
        None | Some(TimeConfig::Never) => TimeSchedule::Never,
        Some(TimeConfig::Once { time }) => TimeSchedule::once(*time),
        Some(TimeConfig::Recurring {
            unit,
            every,
            start,
            end,
        }) => TimeSchedule::recurring(*unit, *every, *start, *end)?,
    };

    let date = match &entry.date {
        // Only reachable through `immediate`, so any date will do.
        None => DateSchedule::once(NaiveDate::MIN),
        Some(DateConfig::Once { date }) => DateSchedule::once(*date),
        Some(DateConfig::Recurring {
            unit,
            every,
            start,
            end,
        }) => DateSchedule::recurring(*unit, *every, *start, *end)?,
        Some(DateConfig::DaysOfWeek {
            every,
            days,
            start,
            end,
        }) => {
            let days = days
                .iter()
                .map(|d| {
                    d.parse::<Weekday>()
                        .map_err(|_| ScheduleError::UnknownDay(d.clone()))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            DateSchedule::days_of_week(*every, days, *start, *end)?
        }
        Some(DateConfig::DayOfMonth {
            every,
            day,
            start,
            end,
        }) => DateSchedule::day_of_month(*every, *day, *start, *end)?,
        Some(DateConfig::LogicalDayOfMonth {
            every,
            ordinal,
            day,
            start,
            end,
        }) => DateSchedule::logical_day_of_month(
            *every,
            Ordinal::from_number(*ordinal)?,
            day.parse::<LogicalDay>()?,
            *start,
            *end,
        )?,
    };

    let time = if entry.date.is_none() {
        TimeSchedule::Never
    } else {
        time
    };
    Ok(Schedule::new(date, time).with_immediate(entry.immediate))
}

fn build_processes(
    cfg: &RawConfigFile,
    schedules: &BTreeMap<String, ScheduleSet>,
) -> Result<ProcessRegistry> {
    let known: BTreeSet<&str> = cfg.process.keys().map(String::as_str).collect();
    let mut registry = ProcessRegistry::new();

    for (name, process) in &cfg.process {
        let lower = Lowering {
            process: name,
            processes: &known,
            schedules,
        };
        let specs = process
            .task
            .iter()
            .map(|task| lower.task(task))
            .collect::<Result<Vec<_>>>()?;
        let built = Process::build(name.clone(), specs).map_err(|source| JobdagError::Build {
            process: name.clone(),
            source,
        })?;
        registry.insert(built);
    }
    Ok(registry)
}

/// Turns task tables into [`TaskSpec`]s.
struct Lowering<'a> {
    process: &'a str,
    processes: &'a BTreeSet<&'a str>,
    schedules: &'a BTreeMap<String, ScheduleSet>,
}

impl Lowering<'_> {
    fn task(&self, task: &TaskConfig) -> Result<TaskSpec> {
        let (kind, children) = match &task.kind {
            TaskKindConfig::Command { cmd } => (TaskKind::action(CommandAction::new(cmd)), &[][..]),
            TaskKindConfig::Log { message } => (TaskKind::action(LogAction::text(message)), &[][..]),
            TaskKindConfig::Fail { message } => (TaskKind::Fail(ValueExpr::text(message)), &[][..]),
            TaskKindConfig::Stop { message } => {
                (TaskKind::Stop(message.as_deref().map(ValueExpr::text)), &[][..])
            }
            TaskKindConfig::Break { message } => {
                (TaskKind::Break(message.as_deref().map(ValueExpr::text)), &[][..])
            }
            TaskKindConfig::Group { tasks } => (TaskKind::Group, tasks.as_slice()),
            TaskKindConfig::Schedule { schedule, tasks } => {
                let set = self.schedules.get(schedule).ok_or_else(|| {
                    JobdagError::ConfigError(format!(
                        "process '{}' refers to unknown schedule '{schedule}'",
                        self.process
                    ))
                })?;
                (TaskKind::OnSchedule(set.clone()), tasks.as_slice())
            }
            TaskKindConfig::Process {
                process,
                args,
                into,
                run_async,
            } => {
                if !self.processes.contains(process.as_str()) {
                    return Err(JobdagError::ConfigError(format!(
                        "process '{}' invokes unknown process '{process}'",
                        self.process
                    )));
                }
                let args = args
                    .iter()
                    .map(|a| ValueExpr::constant(Value::parse_literal(a)))
                    .collect();
                let into = into.clone();
                let invocation = if *run_async {
                    Invocation::Async { into }
                } else {
                    Invocation::Sync { into }
                };
                let kind = TaskKind::Process {
                    name: process.clone(),
                    args,
                    invocation,
                };
                (kind, &[][..])
            }
            TaskKindConfig::WaitforAsync => (TaskKind::WaitForAsync, &[][..]),
            TaskKindConfig::Return { value } => (
                TaskKind::Return(ValueExpr::constant(Value::parse_literal(value))),
                &[][..],
            ),
        };

        let mut spec = match &task.name {
            Some(name) => TaskSpec::named(name.clone(), kind),
            None => TaskSpec::new(kind),
        };
        if let Some(after) = &task.after {
            spec = spec.after(after.clone());
        }
        for child in children {
            spec = spec.child(self.task(child)?);
        }
        Ok(spec)
    }
}

fn build_jobs(
    raw: &BTreeMap<String, JobConfig>,
    processes: &ProcessRegistry,
    schedules: &BTreeMap<String, ScheduleSet>,
) -> Result<Vec<Job>> {
    let mut jobs = Vec::with_capacity(raw.len());
    for (name, job) in raw {
        if !processes.contains(&job.process) {
            return Err(JobdagError::ConfigError(format!(
                "job '{name}' refers to unknown process '{}'",
                job.process
            )));
        }
        for schedule in &job.schedules {
            if !schedules.contains_key(schedule) {
                return Err(JobdagError::ConfigError(format!(
                    "job '{name}' refers to unknown schedule '{schedule}'"
                )));
            }
        }
        jobs.push(Job {
            name: name.clone(),
            process: job.process.clone(),
            properties: job.properties.clone(),
            args: job.args.clone(),
            enabled: job.enabled,
            schedules: job.schedules.clone(),
        });
    }
    Ok(jobs)
}
