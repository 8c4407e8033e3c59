use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, SchedulerError};

/// When a job fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    /// Seconds-resolution cron expression (`sec min hour dom mon dow`).
    Cron(String),
    /// Fixed interval from the previous fire time.
    IntervalSecs(u64),
    /// Single fire at an instant; the job completes afterwards.
    Once(DateTime<Utc>),
}

/// Parse the schedule strings stored on stream configs and in the
/// pipeline config:
///
/// - `interval:300` — every 300 seconds
/// - `once:2026-01-01T00:00:00Z` — single fire
/// - `cron:0 */30 * * * *` (or a bare cron expression) — cron
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let trimmed = expr.trim();
    if let Some(secs) = trimmed.strip_prefix("interval:") {
        let secs: u64 = secs.parse().map_err(|_| SchedulerError::InvalidSchedule {
            expr: expr.to_string(),
            message: "interval seconds must be a positive integer".to_string(),
        })?;
        if secs == 0 {
            return Err(SchedulerError::InvalidSchedule {
                expr: expr.to_string(),
                message: "interval must be at least 1 second".to_string(),
            });
        }
        return Ok(Schedule::IntervalSecs(secs));
    }
    if let Some(at) = trimmed.strip_prefix("once:") {
        let at = DateTime::parse_from_rfc3339(at).map_err(|e| SchedulerError::InvalidSchedule {
            expr: expr.to_string(),
            message: e.to_string(),
        })?;
        return Ok(Schedule::Once(at.with_timezone(&Utc)));
    }

    let cron_expr = trimmed.strip_prefix("cron:").unwrap_or(trimmed);
    cron::Schedule::from_str(cron_expr).map_err(|e| SchedulerError::InvalidSchedule {
        expr: expr.to_string(),
        message: e.to_string(),
    })?;
    Ok(Schedule::Cron(cron_expr.to_string()))
}

/// Next execution strictly after `from`. `None` when the schedule is
/// exhausted (a `Once` whose time has passed).
pub fn compute_next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once(at) => {
            if *at > from {
                Some(*at)
            } else {
                None
            }
        }
        Schedule::IntervalSecs(secs) => Some(from + Duration::seconds(*secs as i64)),
        Schedule::Cron(expr) => {
            // The expression was validated at parse time.
            let parsed = cron::Schedule::from_str(expr).ok()?;
            parsed.after(&from).next()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_accepts_all_forms() {
        assert_eq!(parse_schedule("interval:300").unwrap(), Schedule::IntervalSecs(300));
        assert!(matches!(parse_schedule("cron:0 */30 * * * *").unwrap(), Schedule::Cron(_)));
        assert!(matches!(parse_schedule("0 */30 * * * *").unwrap(), Schedule::Cron(_)));
        assert!(matches!(parse_schedule("once:2026-01-01T00:00:00Z").unwrap(), Schedule::Once(_)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_schedule("interval:0").is_err());
        assert!(parse_schedule("interval:soon").is_err());
        assert!(parse_schedule("whenever").is_err());
        assert!(parse_schedule("once:tomorrow").is_err());
    }

    #[test]
    fn interval_advances_from_given_instant() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = compute_next_run(&Schedule::IntervalSecs(300), from).unwrap();
        assert_eq!(next, from + Duration::seconds(300));
    }

    #[test]
    fn cron_every_thirty_minutes() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 10, 0).unwrap();
        let schedule = parse_schedule("0 */30 * * * *").unwrap();
        let next = compute_next_run(&schedule, from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 0, 30, 0).unwrap());
    }

    #[test]
    fn once_exhausts_after_the_instant() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let schedule = Schedule::Once(at);
        assert_eq!(compute_next_run(&schedule, at - Duration::hours(1)), Some(at));
        assert_eq!(compute_next_run(&schedule, at), None);
    }
}
