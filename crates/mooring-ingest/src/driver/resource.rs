//! Pacing parameters and driver capabilities

use mooring_common::{MooringError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

pub const RECORDS_PER_SECOND: &str = "records_per_second";
pub const BATCH_SIZE: &str = "batch_size";
pub const PUBLISHER_POLLING_INTERVAL: &str = "publisher_polling_interval";

pub const ALL_PARAMS: [&str; 3] = [RECORDS_PER_SECOND, BATCH_SIZE, PUBLISHER_POLLING_INTERVAL];

/// Parameters that pace the publisher loops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceParams {
    /// Upper bound on samples handed to `on_data` per second
    pub records_per_second: f64,
    /// Samples requested from the parser per batch
    pub batch_size: usize,
    /// Seconds a publisher loop sleeps when it has nothing to drain
    pub publisher_polling_interval: f64,
}

impl Default for ResourceParams {
    fn default() -> Self {
        Self {
            records_per_second: 60.0,
            batch_size: 10,
            publisher_polling_interval: 1.0,
        }
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl ResourceParams {
    /// Minimum gap between two consecutive batches: `batch_size / records_per_second`.
    pub fn delay(&self) -> Duration {
        seconds(self.batch_size as f64 / self.records_per_second)
    }

    pub fn poll_interval(&self) -> Duration {
        seconds(self.publisher_polling_interval)
    }

    /// First invalid parameter, if any.
    pub fn invalid_param(&self) -> Option<(&'static str, String)> {
        if !(self.records_per_second.is_finite() && self.records_per_second > 0.0) {
            return Some((RECORDS_PER_SECOND, "must be a positive number".to_string()));
        }
        if self.batch_size == 0 {
            return Some((BATCH_SIZE, "must be a positive integer".to_string()));
        }
        if !(self.publisher_polling_interval.is_finite() && self.publisher_polling_interval > 0.0) {
            return Some((PUBLISHER_POLLING_INTERVAL, "must be a positive number".to_string()));
        }
        None
    }

    pub fn validate(&self) -> Result<()> {
        match self.invalid_param() {
            Some((name, reason)) => Err(MooringError::resource(name, reason)),
            None => Ok(()),
        }
    }

    /// Apply a parameter map. Either every entry is applied or none is.
    pub fn apply(&mut self, params: &Map<String, Value>) -> Result<()> {
        let mut next = *self;
        for (name, value) in params {
            match name.as_str() {
                RECORDS_PER_SECOND => next.records_per_second = positive_number(name, value)?,
                BATCH_SIZE => next.batch_size = positive_integer(name, value)?,
                PUBLISHER_POLLING_INTERVAL => {
                    next.publisher_polling_interval = positive_number(name, value)?
                }
                _ => return Err(MooringError::resource(name.as_str(), "unknown parameter")),
            }
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        match name {
            RECORDS_PER_SECOND => Ok(Value::from(self.records_per_second)),
            BATCH_SIZE => Ok(Value::from(self.batch_size)),
            PUBLISHER_POLLING_INTERVAL => Ok(Value::from(self.publisher_polling_interval)),
            _ => Err(MooringError::resource(name, "unknown parameter")),
        }
    }

    pub fn query(&self, query: &ResourceQuery) -> Result<Map<String, Value>> {
        let names: Vec<&str> = match query {
            ResourceQuery::All => ALL_PARAMS.to_vec(),
            ResourceQuery::Keys(keys) => keys.iter().map(String::as_str).collect(),
        };
        names
            .into_iter()
            .map(|name| Ok((name.to_string(), self.get(name)?)))
            .collect()
    }
}

fn positive_number(name: &str, value: &Value) -> Result<f64> {
    let number = value
        .as_f64()
        .ok_or_else(|| MooringError::resource(name, format!("expected a number, got {value}")))?;
    if number > 0.0 {
        Ok(number)
    } else {
        Err(MooringError::resource(name, format!("must be positive, got {number}")))
    }
}

fn positive_integer(name: &str, value: &Value) -> Result<usize> {
    if let Some(number) = value.as_i64() {
        if number <= 0 {
            return Err(MooringError::resource(name, format!("must be positive, got {number}")));
        }
        return usize::try_from(number)
            .map_err(|_| MooringError::resource(name, format!("{number} is out of range")));
    }
    if let Some(number) = value.as_u64() {
        return usize::try_from(number)
            .map_err(|_| MooringError::resource(name, format!("{number} is out of range")));
    }
    Err(MooringError::resource(name, format!("expected an integer, got {value}")))
}

/// Which resource parameters to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceQuery {
    All,
    Keys(Vec<String>),
}

/// Commands a hosting application may send to a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverCommand {
    StartSampling,
    StopSampling,
    GetResource,
    SetResource,
}

/// Commands valid in the given sampling state.
pub fn capabilities(sampling: bool) -> Vec<DriverCommand> {
    if sampling {
        vec![
            DriverCommand::StopSampling,
            DriverCommand::GetResource,
            DriverCommand::SetResource,
        ]
    } else {
        vec![
            DriverCommand::StartSampling,
            DriverCommand::GetResource,
            DriverCommand::SetResource,
        ]
    }
}
