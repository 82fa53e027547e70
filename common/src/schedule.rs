// Time expression parsing and next-fire-time calculation
//
// Two grammars are accepted: cron expressions (with optional seconds
// column and the `@hourly` family) and `@every <duration>` intervals.

use crate::errors::ScheduleError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;
use std::time::Duration;

/// A parsed time expression. Cheap to clone; firing entries keep their
/// own copy.
#[derive(Debug, Clone)]
pub enum TimeExpr {
    Cron(Box<CronSchedule>),
    Every(Duration),
}

impl TimeExpr {
    /// Parse a `when` expression. Returns an error for anything the
    /// grammar does not cover; callers skip such descriptors.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();

        if let Some(spec) = trimmed.strip_prefix("@every ") {
            let interval = parse_duration(spec).map_err(|reason| {
                ScheduleError::InvalidExpression {
                    expression: expression.to_string(),
                    reason,
                }
            })?;
            if interval.is_zero() {
                return Err(ScheduleError::InvalidExpression {
                    expression: expression.to_string(),
                    reason: "interval must be positive".to_string(),
                });
            }
            return Ok(TimeExpr::Every(interval));
        }

        match CronSchedule::from_str(trimmed) {
            Ok(schedule) => Ok(TimeExpr::Cron(Box::new(schedule))),
            Err(err) => {
                // Classic five-field crontab lines lack the seconds
                // column; retry with one prepended.
                if trimmed.split_whitespace().count() == 5 {
                    if let Ok(schedule) = CronSchedule::from_str(&format!("0 {trimmed}")) {
                        return Ok(TimeExpr::Cron(Box::new(schedule)));
                    }
                }
                Err(ScheduleError::InvalidExpression {
                    expression: expression.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Next fire time strictly after `now`, or `None` when the
    /// expression has no future firings.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeExpr::Cron(schedule) => schedule.after(&now).next(),
            TimeExpr::Every(interval) => {
                let interval = ChronoDuration::from_std(*interval).ok()?;
                now.checked_add_signed(interval)
            }
        }
    }
}

/// Parse a Go-style duration string: one or more `<number><unit>`
/// segments where the unit is `ms`, `s`, `m` or `h`, e.g. `"1s"`,
/// `"90m"`, `"1h30m"`, `"1.5h"`.
fn parse_duration(spec: &str) -> Result<Duration, String> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = spec;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| format!("missing unit in duration '{spec}'"))?;
        if digits_end == 0 {
            return Err(format!("missing value in duration '{spec}'"));
        }

        let value: f64 = rest[..digits_end]
            .parse()
            .map_err(|_| format!("invalid value in duration '{spec}'"))?;
        rest = &rest[digits_end..];

        let (unit_millis, unit_len) = if rest.starts_with("ms") {
            (1.0, 2)
        } else if rest.starts_with('s') {
            (1_000.0, 1)
        } else if rest.starts_with('m') {
            (60_000.0, 1)
        } else if rest.starts_with('h') {
            (3_600_000.0, 1)
        } else {
            return Err(format!("unknown unit in duration '{spec}'"));
        };
        rest = &rest[unit_len..];

        total += Duration::from_millis((value * unit_millis) as u64);
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_every() {
        let expr = TimeExpr::parse("@every 1s").unwrap();
        assert!(matches!(expr, TimeExpr::Every(d) if d == Duration::from_secs(1)));

        let expr = TimeExpr::parse("@every 1h30m").unwrap();
        assert!(matches!(expr, TimeExpr::Every(d) if d == Duration::from_secs(5400)));

        let expr = TimeExpr::parse("@every 1.5h").unwrap();
        assert!(matches!(expr, TimeExpr::Every(d) if d == Duration::from_secs(5400)));
    }

    #[test]
    fn test_parse_every_rejects_garbage() {
        assert!(TimeExpr::parse("@every ").is_err());
        assert!(TimeExpr::parse("@every fast").is_err());
        assert!(TimeExpr::parse("@every 5d").is_err());
        assert!(TimeExpr::parse("@every 0s").is_err());
    }

    #[test]
    fn test_parse_cron_with_seconds() {
        assert!(TimeExpr::parse("0 30 4 * * *").is_ok());
    }

    #[test]
    fn test_parse_five_field_cron() {
        // Classic crontab lines get a seconds column prepended.
        let expr = TimeExpr::parse("30 4 * * *").unwrap();
        let now = Utc::now();
        let next = expr.next_after(now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn test_parse_descriptor() {
        assert!(TimeExpr::parse("@hourly").is_ok());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(TimeExpr::parse("not a schedule").is_err());
        assert!(TimeExpr::parse("").is_err());
    }

    #[test]
    fn test_next_after_every_advances() {
        let expr = TimeExpr::parse("@every 10s").unwrap();
        let now = Utc::now();
        let next = expr.next_after(now).unwrap();
        assert_eq!((next - now).num_seconds(), 10);
    }

    #[test]
    fn test_next_after_cron_advances() {
        let expr = TimeExpr::parse("0 0 12 * * *").unwrap();
        let now = Utc::now();
        let next = expr.next_after(now).unwrap();
        assert!(next > now);
    }
}
