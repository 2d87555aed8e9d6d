// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;

use crate::calendar::{DateUnit, ScheduleSet, TimeUnit};
use crate::engine::ProcessRegistry;
use crate::jobs::Job;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// sleep_granularity_ms = 500
///
/// [[schedule.nightly]]
/// date = { kind = "recurring", unit = "days", start = "2026-01-01" }
/// time = { kind = "once", time = "02:00:00" }
///
/// [process.etl]
/// [[process.etl.task]]
/// name = "extract"
/// kind = "command"
/// cmd = "./extract.sh"
///
/// [[process.etl.task]]
/// name = "report"
/// kind = "log"
/// after = "extract FAILS"
/// message = "extract failed"
///
/// [job.nightly_etl]
/// process = "etl"
/// schedules = ["nightly"]
/// ```
///
/// All sections are optional at the TOML level; validation requires at
/// least one process.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Named schedule sets from `[[schedule.<name>]]`.
    #[serde(default)]
    pub schedule: BTreeMap<String, Vec<ScheduleConfig>>,

    /// Processes from `[process.<name>]`.
    #[serde(default)]
    pub process: BTreeMap<String, ProcessConfig>,

    /// Jobs from `[job.<name>]`.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// Validated configuration with schedules and processes built.
#[derive(Debug)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub schedules: BTreeMap<String, ScheduleSet>,
    pub processes: ProcessRegistry,
    pub jobs: Vec<Job>,
}

/// `[config]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ConfigSection {
    /// Upper bound on waiting for in-flight runs at shutdown.
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,

    /// Longest single sleep while waiting for a schedule occurrence.
    #[serde(default = "default_sleep_granularity_ms")]
    pub sleep_granularity_ms: u64,

    /// Upper bound on joining a schedule loop being revised.
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
}

fn default_close_timeout_secs() -> u64 {
    30
}

fn default_sleep_granularity_ms() -> u64 {
    1000
}

fn default_join_timeout_secs() -> u64 {
    5
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            close_timeout_secs: default_close_timeout_secs(),
            sleep_granularity_ms: default_sleep_granularity_ms(),
            join_timeout_secs: default_join_timeout_secs(),
        }
    }
}

impl ConfigSection {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn sleep_granularity(&self) -> Duration {
        Duration::from_millis(self.sleep_granularity_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

/// One member of a `[[schedule.<name>]]` array.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Fire once right away, before the first calendar occurrence.
    #[serde(default)]
    pub immediate: bool,

    /// Omitted only for schedules that fire immediately and never again.
    #[serde(default)]
    pub date: Option<DateConfig>,

    /// Defaults to `never`.
    #[serde(default)]
    pub time: Option<TimeConfig>,
}

fn one() -> u32 {
    1
}

/// `date = { kind = ..., ... }`. Dates are quoted ISO strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DateConfig {
    Once {
        date: NaiveDate,
    },
    Recurring {
        unit: DateUnit,
        #[serde(default = "one")]
        every: u32,
        start: NaiveDate,
        #[serde(default)]
        end: Option<NaiveDate>,
    },
    DaysOfWeek {
        #[serde(default = "one")]
        every: u32,
        days: Vec<String>,
        start: NaiveDate,
        #[serde(default)]
        end: Option<NaiveDate>,
    },
    DayOfMonth {
        #[serde(default = "one")]
        every: u32,
        day: u32,
        start: NaiveDate,
        #[serde(default)]
        end: Option<NaiveDate>,
    },
    LogicalDayOfMonth {
        #[serde(default = "one")]
        every: u32,
        /// 1-4, or 0 for the last one.
        ordinal: u32,
        /// `day`, `weekday`, `weekend_day` or a weekday name.
        day: String,
        start: NaiveDate,
        #[serde(default)]
        end: Option<NaiveDate>,
    },
}

/// `time = { kind = ..., ... }`. Times are quoted `HH:MM:SS` strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeConfig {
    Never,
    Once {
        time: NaiveTime,
    },
    Recurring {
        unit: TimeUnit,
        #[serde(default = "one")]
        every: u32,
        start: NaiveTime,
        end: NaiveTime,
    },
}

/// `[process.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessConfig {
    #[serde(default)]
    pub task: Vec<TaskConfig>,
}

/// One `[[process.<name>.task]]` entry (or a nested `tasks` entry).
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Omit for anonymous tasks.
    #[serde(default)]
    pub name: Option<String>,

    /// AFTER clause, e.g. `"A SUCCEEDS OR B"`. Without one, the task
    /// follows its previous sibling.
    #[serde(default)]
    pub after: Option<String>,

    #[serde(flatten)]
    pub kind: TaskKindConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKindConfig {
    Command {
        cmd: String,
    },
    Log {
        message: String,
    },
    Fail {
        message: String,
    },
    Stop {
        #[serde(default)]
        message: Option<String>,
    },
    Break {
        #[serde(default)]
        message: Option<String>,
    },
    Group {
        #[serde(default)]
        tasks: Vec<TaskConfig>,
    },
    /// Run the nested tasks on every occurrence of a named schedule.
    Schedule {
        schedule: String,
        #[serde(default)]
        tasks: Vec<TaskConfig>,
    },
    Process {
        process: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        into: Option<String>,
        #[serde(default, rename = "async")]
        run_async: bool,
    },
    WaitforAsync,
    Return {
        value: String,
    },
}

/// `[job.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub process: String,

    /// TOML file of variables seeded into every run.
    #[serde(default)]
    pub properties: Option<PathBuf>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub schedules: Vec<String>,
}

fn default_enabled() -> bool {
    true
}
