use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use thiserror::Error;

/// Cron trigger of a scheduler, evaluated in one timezone.
///
/// Accepts the classic 5-field form (minute precision) and the 6/7-field
/// forms with a leading seconds column.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    source: String,
    schedule: Schedule,
    tz: Tz,
}

/// Rejected cron trigger.
#[derive(Debug, Clone, Error)]
pub enum CronParseError {
    #[error("cron expression '{0}' needs 5, 6 or 7 fields")]
    FieldCount(String),

    #[error("bad cron expression '{expression}': {reason}")]
    Expression { expression: String, reason: String },

    #[error("unknown timezone '{0}'")]
    Timezone(String),
}

impl CronSchedule {
    /// Parse an expression, evaluated in UTC.
    pub fn new(expression: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let source = match fields.len() {
            5 => format!("0 {}", fields.join(" ")),
            6 | 7 => fields.join(" "),
            _ => return Err(CronParseError::FieldCount(expression.to_string())),
        };

        let schedule = Schedule::from_str(&source).map_err(|e| CronParseError::Expression {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source,
            schedule,
            tz: Tz::UTC,
        })
    }

    pub fn with_timezone(self, timezone: &str) -> Result<Self, CronParseError> {
        let tz = Tz::from_str(timezone).map_err(|_| CronParseError::Timezone(timezone.to_string()))?;
        Ok(Self { tz, ..self })
    }

    /// Expression with its seconds column.
    pub fn expression(&self) -> &str {
        &self.source
    }

    pub fn timezone(&self) -> &str {
        self.tz.name()
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.tz))
            .next()
            .map(|fire| fire.with_timezone(&Utc))
    }
}
