// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::engine::Value;
use crate::errors::{JobdagError, Result};

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** build schedules
/// or processes. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file and build everything it declares.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` default functions).
/// - Builds every schedule and process, which checks schedule parameters,
///   AFTER clauses, predecessor cycles and the other structural rules.
/// - Checks that jobs refer to known processes and schedules.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Read a job properties file: a flat TOML table whose entries seed the
/// variables of every run of the job.
pub fn load_properties(path: impl AsRef<Path>) -> Result<Vec<(String, Value)>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let table: toml::Table = toml::from_str(&contents)?;

    table
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                toml::Value::String(s) => Value::Text(s),
                toml::Value::Integer(i) => Value::Int(i),
                toml::Value::Float(f) => Value::Float(f),
                toml::Value::Boolean(b) => Value::Bool(b),
                toml::Value::Datetime(dt) => Value::Text(dt.to_string()),
                other => {
                    return Err(JobdagError::ConfigError(format!(
                        "property '{key}' in {} must be a scalar (got {})",
                        path.display(),
                        other.type_str()
                    )));
                }
            };
            Ok((key, value))
        })
        .collect()
}

/// `Jobdag.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Jobdag.toml")
}
