//! When a pipeline ticks.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid schedule '{expr}': {source}")]
pub struct ScheduleError {
  pub expr: String,
  #[source]
  pub source: cron::error::Error,
}

/// Yields the next fire time after a given instant.
pub trait Schedule: Send + Sync {
  /// `None` once the schedule has no more fire times.
  fn next(&self, after: DateTime<Local>) -> Option<DateTime<Local>>;
}

/// Fires again as soon as asked: back-to-back ticks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantDelaySchedule;

impl Schedule for ConstantDelaySchedule {
  fn next(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
    Some(after)
  }
}

/// Cron expression with a seconds field (`sec min hour dom month dow [year]`) or a
/// descriptor such as `@hourly`.
#[derive(Debug, Clone)]
pub struct CronSchedule {
  schedule: cron::Schedule,
}

impl FromStr for CronSchedule {
  type Err = ScheduleError;

  fn from_str(expr: &str) -> Result<Self, Self::Err> {
    cron::Schedule::from_str(expr)
      .map(|schedule| Self { schedule })
      .map_err(|source| ScheduleError {
        expr: expr.to_string(),
        source,
      })
  }
}

impl Schedule for CronSchedule {
  fn next(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
    self.schedule.after(&after).next()
  }
}

/// Empty (or blank) selects [ConstantDelaySchedule], anything else is parsed as cron.
pub fn parse_schedule(expr: &str) -> Result<Arc<dyn Schedule>, ScheduleError> {
  let expr = expr.trim();
  if expr.is_empty() {
    return Ok(Arc::new(ConstantDelaySchedule));
  }
  Ok(Arc::new(CronSchedule::from_str(expr)?))
}
