//! Cron expression parsing and validation.
//!
//! Expressions are parsed via the `cron` crate, which expects 6-field
//! (with seconds) or 7-field formats. Typical 5-field user input is
//! normalized by prepending a `0` seconds field. Validation also
//! enforces a firing-frequency floor so a definition cannot flood the
//! queue.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{Result, ScheduleError};

/// Minimum allowed interval between consecutive fire times.
pub const MIN_INTERVAL_SECS: i64 = 60;

/// How many upcoming fire times validation samples when estimating the
/// expression's minimum interval.
const VALIDATION_SAMPLES: usize = 5;

/// Normalize a cron expression to the 6/7-field format expected by the
/// `cron` crate. A standard 5-field expression gets `0` prepended as
/// the seconds field.
fn normalize_cron_expr(expr: &str) -> String {
    let field_count = expr.split_whitespace().count();
    if field_count == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Parse a cron expression into a [`cron::Schedule`].
pub fn parse_schedule(expr: &str) -> Result<cron::Schedule> {
    let normalized = normalize_cron_expr(expr);
    cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidExpression {
        expression: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Validate an expression for use in a trigger.
///
/// Parses it, then samples consecutive upcoming fire times and rejects
/// the expression when any gap is below [`MIN_INTERVAL_SECS`].
pub fn validate_schedule(expr: &str) -> Result<()> {
    let schedule = parse_schedule(expr)?;

    let upcoming: Vec<DateTime<Utc>> = schedule
        .upcoming(Utc)
        .take(VALIDATION_SAMPLES)
        .collect();

    for pair in upcoming.windows(2) {
        let gap = (pair[1] - pair[0]).num_seconds();
        if gap < MIN_INTERVAL_SECS {
            return Err(ScheduleError::TooFrequent {
                expression: expr.to_string(),
                interval_secs: gap,
                min_secs: MIN_INTERVAL_SECS,
            });
        }
    }

    Ok(())
}

/// Next fire time strictly after `from`, or `None` when the expression
/// is invalid or has no further occurrences.
pub fn calculate_next_run(expr: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let schedule = parse_schedule(expr).ok()?;
    schedule.after(&from).next()
}

/// The next `count` fire times from now, ascending. Empty when the
/// expression is invalid.
pub fn next_runs(expr: &str, count: usize) -> Vec<DateTime<Utc>> {
    match parse_schedule(expr) {
        Ok(schedule) => schedule.upcoming(Utc).take(count).collect(),
        Err(_) => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_field_expression_parses() {
        assert!(parse_schedule("0 30 9 * * 1-5").is_ok());
    }

    #[test]
    fn five_field_expression_is_normalized() {
        assert!(parse_schedule("30 9 * * 1-5").is_ok());
        assert!(parse_schedule("*/5 * * * *").is_ok());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            parse_schedule("not a cron"),
            Err(ScheduleError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn minutely_schedule_passes_validation() {
        assert!(validate_schedule("* * * * *").is_ok());
        assert!(validate_schedule("0 * * * * *").is_ok());
    }

    #[test]
    fn secondly_schedule_is_too_frequent() {
        let err = validate_schedule("* * * * * *").unwrap_err();
        match err {
            ScheduleError::TooFrequent { interval_secs, .. } => {
                assert!(interval_secs < MIN_INTERVAL_SECS);
            }
            other => panic!("expected TooFrequent, got {other:?}"),
        }
    }

    #[test]
    fn thirty_second_schedule_is_too_frequent() {
        assert!(matches!(
            validate_schedule("*/30 * * * * *"),
            Err(ScheduleError::TooFrequent { .. })
        ));
    }

    #[test]
    fn invalid_expression_fails_validation_as_invalid() {
        assert!(matches!(
            validate_schedule("61 * * * *"),
            Err(ScheduleError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn next_run_is_strictly_after_from() {
        let from = Utc::now();
        let next = calculate_next_run("* * * * *", from).unwrap();
        assert!(next > from);
    }

    #[test]
    fn next_run_of_invalid_expression_is_none() {
        assert!(calculate_next_run("nope", Utc::now()).is_none());
    }

    #[test]
    fn next_runs_are_ascending() {
        let runs = next_runs("0 * * * * *", 4);
        assert_eq!(runs.len(), 4);
        for pair in runs.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!((pair[1] - pair[0]).num_seconds(), 60);
        }
    }

    #[test]
    fn next_runs_of_invalid_expression_is_empty() {
        assert!(next_runs("nope", 3).is_empty());
    }
}
