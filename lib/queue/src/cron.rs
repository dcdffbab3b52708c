//! The Cron Engine: evaluates cron expressions and fires each schedule at
//! most once per matching minute.

use crate::error::CronError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use ::cron::Schedule;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

/// A parsed, 5-field cron schedule with an attached IANA timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSchedule {
    /// The 5-field cron expression (minute hour day-of-month month day-of-week).
    pub expression: String,
    /// IANA timezone name the expression is evaluated in. Defaults to UTC.
    pub timezone: Option<String>,
}

impl CronSchedule {
    /// Creates a new cron schedule, defaulting to UTC.
    #[must_use]
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            timezone: None,
        }
    }

    /// Sets the IANA timezone name.
    #[must_use]
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    fn resolve_timezone(&self) -> Result<Tz, CronError> {
        match &self.timezone {
            None => Ok(Tz::UTC),
            Some(name) => Tz::from_str(name).map_err(|_| CronError::InvalidTimezone {
                timezone: name.clone(),
            }),
        }
    }

    /// Parses the expression into a `cron::Schedule`.
    ///
    /// The `cron` crate parses 6/7-field (seconds-qualified) expressions; a
    /// 5-field input is normalized by prepending a `"0"` seconds field.
    fn parse(&self) -> Result<Schedule, CronError> {
        let field_count = self.expression.split_whitespace().count();
        let normalized = if field_count == 5 {
            format!("0 {}", self.expression)
        } else {
            self.expression.clone()
        };
        Schedule::from_str(&normalized).map_err(|e| CronError::InvalidExpression {
            expression: self.expression.clone(),
            reason: e.to_string(),
        })
    }

    /// Validates the expression and timezone without computing a next fire time.
    pub fn validate(&self) -> Result<(), CronError> {
        self.parse()?;
        self.resolve_timezone()?;
        Ok(())
    }

    /// Returns the next fire time strictly after `after`, in UTC.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CronError> {
        let schedule = self.parse()?;
        let tz = self.resolve_timezone()?;
        let after_in_tz = after.with_timezone(&tz);
        Ok(schedule
            .after(&after_in_tz)
            .next()
            .map(|next| next.with_timezone(&Utc)))
    }
}

/// Tracks, per schedule key, the last minute a fire was emitted for, so that
/// a schedule is not fired twice within the same matching minute even if the
/// sync loop runs more than once inside it.
#[derive(Default)]
pub struct CronEngine {
    last_fired: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CronEngine {
    /// Creates an engine with no fire history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates `schedule` against `now`; returns `Some(now)` exactly once
    /// per matching minute, keyed by `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the schedule's expression or timezone is invalid.
    pub fn poll(
        &self,
        key: &str,
        schedule: &CronSchedule,
        now: DateTime<Utc>,
    ) -> Result<bool, CronError> {
        let mut last_fired = self.last_fired.lock().expect("lock poisoned");
        let floor = now - chrono::Duration::seconds(now.timestamp() % 60);

        if let Some(last) = last_fired.get(key) {
            if *last == floor {
                return Ok(false);
            }
        }

        let due = schedule
            .next_after(floor - chrono::Duration::seconds(1))?
            .is_some_and(|next| next <= now);

        if due {
            last_fired.insert(key.to_string(), floor);
        }
        Ok(due)
    }

    /// Drops fire history for a key, e.g. when its schedule is deleted.
    pub fn forget(&self, key: &str) {
        self.last_fired.lock().expect("lock poisoned").remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn validate_accepts_five_field_expression() {
        let schedule = CronSchedule::new("0 7 * * *");
        assert!(schedule.validate().is_ok());
    }

    #[test]
    fn validate_rejects_garbage_expression() {
        let schedule = CronSchedule::new("not a cron expression at all");
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_timezone() {
        let schedule = CronSchedule::new("0 7 * * *").with_timezone("Not/A_Zone");
        assert!(matches!(
            schedule.validate(),
            Err(CronError::InvalidTimezone { .. })
        ));
    }

    #[test]
    fn next_after_computes_following_daily_fire() {
        let schedule = CronSchedule::new("0 7 * * *");
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 7, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 2, 7, 0, 0).unwrap());
    }

    #[test]
    fn next_after_honors_timezone() {
        let schedule = CronSchedule::new("0 7 * * *").with_timezone("America/New_York");
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap().unwrap();
        // 07:00 America/New_York on Jan 1 is 12:00 UTC (EST, UTC-5).
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn poll_fires_once_per_matching_minute() {
        let engine = CronEngine::new();
        let schedule = CronSchedule::new("0 7 * * *");
        let fire_minute = Utc.with_ymd_and_hms(2026, 1, 1, 7, 0, 30).unwrap();

        assert!(engine.poll("daily-report", &schedule, fire_minute).unwrap());
        let again = fire_minute + chrono::Duration::seconds(10);
        assert!(!engine.poll("daily-report", &schedule, again).unwrap());
    }

    #[test]
    fn poll_does_not_fire_outside_matching_minute() {
        let engine = CronEngine::new();
        let schedule = CronSchedule::new("0 7 * * *");
        let off_minute = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        assert!(!engine.poll("daily-report", &schedule, off_minute).unwrap());
    }

    #[test]
    fn forget_clears_fire_history_for_key() {
        let engine = CronEngine::new();
        let schedule = CronSchedule::new("0 7 * * *");
        let fire_minute = Utc.with_ymd_and_hms(2026, 1, 1, 7, 0, 0).unwrap();
        engine.poll("daily-report", &schedule, fire_minute).unwrap();
        engine.forget("daily-report");
        assert!(engine.poll("daily-report", &schedule, fire_minute).unwrap());
    }
}
