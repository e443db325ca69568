//! CI watch configuration resolution.
//!
//! Each field resolves with three-tier precedence: the step's own config map,
//! then the runtime `ci` section, then the built-in default. The loosely typed
//! step map is normalized here and not carried any further.

use std::time::Duration;

use serde_json::Value;

use crate::config::CiDefaults;
use crate::domain::StepDefinition;
use crate::duration::parse_duration_value;
use crate::error::{Result, StepError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(120);
pub const DEFAULT_GRACE_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_FETCH_ERROR_TOLERANCE: u32 = 3;

/// Fully resolved CI watch settings
#[derive(Debug, Clone, PartialEq)]
pub struct CiWatchConfig {
    pub poll_interval: Duration,
    pub grace_period: Duration,
    pub grace_poll_interval: Duration,
    pub timeout: Duration,
    /// Allow-list of required check or workflow names; empty means all checks
    pub workflows: Vec<String>,
    pub fetch_error_tolerance: u32,
}

impl Default for CiWatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            grace_poll_interval: DEFAULT_GRACE_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            workflows: Vec::new(),
            fetch_error_tolerance: DEFAULT_FETCH_ERROR_TOLERANCE,
        }
    }
}

impl CiWatchConfig {
    /// Resolve settings for `step` against the runtime defaults.
    pub fn resolve(step: &StepDefinition, runtime: &CiDefaults) -> Result<Self> {
        let config = Self {
            poll_interval: duration_field(step, "poll_interval", runtime.poll_interval, DEFAULT_POLL_INTERVAL)?,
            grace_period: duration_field(step, "grace_period", runtime.grace_period, DEFAULT_GRACE_PERIOD)?,
            grace_poll_interval: duration_field(
                step,
                "grace_poll_interval",
                runtime.grace_poll_interval,
                DEFAULT_GRACE_POLL_INTERVAL,
            )?,
            timeout: duration_field(step, "timeout", runtime.timeout, DEFAULT_TIMEOUT)?,
            workflows: workflows_field(step)?,
            fetch_error_tolerance: tolerance_field(step, runtime.fetch_error_tolerance)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(StepError::InvalidConfig("poll_interval must be > 0".into()));
        }
        if self.grace_poll_interval.is_zero() {
            return Err(StepError::InvalidConfig("grace_poll_interval must be > 0".into()));
        }
        if self.timeout.is_zero() {
            return Err(StepError::InvalidConfig("timeout must be > 0".into()));
        }
        Ok(())
    }
}

fn duration_field(step: &StepDefinition, key: &str, runtime: Option<Duration>, default: Duration) -> Result<Duration> {
    match step.config.get(key) {
        Some(Value::Null) | None => Ok(runtime.unwrap_or(default)),
        Some(value) => parse_duration_value(value).map_err(|e| StepError::InvalidConfig(format!("{}: {}", key, e))),
    }
}

fn workflows_field(step: &StepDefinition) -> Result<Vec<String>> {
    let names = match step.config.get("workflows") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| StepError::InvalidConfig(format!("workflows: not a string: {}", item)))
            })
            .collect::<Result<Vec<_>>>()?,
        Some(other) => {
            return Err(StepError::InvalidConfig(format!("workflows: expected list, got {}", other)));
        }
    };
    Ok(names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect())
}

fn tolerance_field(step: &StepDefinition, runtime: Option<u32>) -> Result<u32> {
    let value = match step.config.get("fetch_error_tolerance") {
        None | Some(Value::Null) => runtime.unwrap_or(DEFAULT_FETCH_ERROR_TOLERANCE),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| StepError::InvalidConfig(format!("fetch_error_tolerance: not a count: {}", v)))?,
    };
    Ok(value.max(1))
}
