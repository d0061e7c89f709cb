// src/queue/schedule.rs
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use super::{QueueError, QueueResult};

/// Parse a cron expression, auto-prepending "0 " for 5-field expressions.
///
/// The `cron` crate requires 6 or 7 fields (with seconds), schedules are
/// usually declared with 5.
pub fn parse_cron(expr: &str) -> QueueResult<Schedule> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    let normalized = if parts.len() == 5 {
        format!("0 {}", parts.join(" "))
    } else {
        expr.trim().to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| QueueError::InvalidPattern {
        pattern: expr.to_string(),
        reason: e.to_string(),
    })
}

/// First fire time strictly after `after`.
pub fn next_fire(pattern: &str, after: DateTime<Utc>) -> QueueResult<DateTime<Utc>> {
    parse_cron(pattern)?
        .after(&after)
        .next()
        .ok_or_else(|| QueueError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "no upcoming fire time".to_string(),
        })
}
