//! Per-company backoff scheduling.
//!
//! Pure functions over [`BackoffInfo`]; stores call these inside their
//! read-modify-write updates so the arithmetic stays identical between the
//! in-memory and Postgres implementations.
//!
//! The ladder has eight levels. A company climbs it only after
//! [`MIN_FAILURES_FOR_BACKOFF`] consecutive failures, by one or two levels
//! depending on how severe its recent errors were, and steps down one level
//! per successful scrape. Fifty lifetime failures park the company until an
//! operator clears its errors.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::models::{BackoffInfo, ScrapingError};

pub const MAX_BACKOFF_LEVEL: u32 = 7;
pub const MIN_FAILURES_FOR_BACKOFF: u32 = 3;
pub const MAX_TOTAL_FAILURES: u32 = 50;
/// Errors older than this no longer count toward severity.
pub const ERROR_WINDOW_HOURS: i64 = 24;

const JITTER_FRACTION: f64 = 0.2;

/// Delay before the next scrape attempt at a given level.
pub fn base_delay(level: u32) -> Duration {
    match level {
        0 => Duration::zero(),
        1 => Duration::minutes(5),
        2 => Duration::minutes(30),
        3 => Duration::hours(2),
        4 => Duration::hours(6),
        5 => Duration::hours(24),
        6 => Duration::days(3),
        _ => Duration::days(7),
    }
}

/// Spread a delay by +/-20% so companies sharing a failure event do not all
/// come back at the same instant.
fn jittered(delay: Duration) -> Duration {
    let millis = delay.num_milliseconds();
    if millis <= 0 {
        return Duration::zero();
    }
    let factor = 1.0 + rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    Duration::milliseconds((millis as f64 * factor) as i64)
}

/// Summed severity of a set of recorded errors.
pub fn error_severity(errors: &[ScrapingError]) -> u32 {
    errors.iter().map(|e| e.kind.severity()).sum()
}

/// Errors still inside the rolling window at `now`.
pub fn errors_within_window(errors: &[ScrapingError], now: DateTime<Utc>) -> Vec<ScrapingError> {
    let cutoff = now - Duration::hours(ERROR_WINDOW_HOURS);
    errors.iter().filter(|e| e.at > cutoff).cloned().collect()
}

/// Recompute backoff after a failed scrape.
///
/// `recent_errors` must already be pruned to the rolling window and include
/// the failure being recorded. Below the consecutive-failure threshold the
/// level holds steady but the next allowed time still moves out by the
/// current level's delay.
pub fn after_failure(
    info: &BackoffInfo,
    recent_errors: &[ScrapingError],
    now: DateTime<Utc>,
) -> BackoffInfo {
    let consecutive_failures = info.consecutive_failures + 1;
    let total_failures = info.total_failures + 1;

    let mut level = info.level;
    if consecutive_failures >= MIN_FAILURES_FOR_BACKOFF {
        let severity = error_severity(recent_errors);
        let bump = (severity / 5).clamp(1, 2);
        level = (level + bump).min(MAX_BACKOFF_LEVEL);
    }

    BackoffInfo {
        level,
        next_allowed_scrape: now + jittered(base_delay(level)),
        consecutive_failures,
        last_successful_scrape: info.last_successful_scrape,
        total_failures,
    }
}

/// Recompute backoff after a successful scrape: one step back down the
/// ladder, consecutive count reset, lifetime total untouched.
pub fn after_success(info: &BackoffInfo, now: DateTime<Utc>) -> BackoffInfo {
    BackoffInfo {
        level: info.level.saturating_sub(1),
        next_allowed_scrape: now,
        consecutive_failures: 0,
        last_successful_scrape: Some(now),
        total_failures: info.total_failures,
    }
}

/// Whether a scheduled scrape should be skipped outright.
pub fn should_skip(info: &BackoffInfo, now: DateTime<Utc>) -> bool {
    info.total_failures >= MAX_TOTAL_FAILURES || now < info.next_allowed_scrape
}

/// Operator-facing one-liner for why a company is (or is not) being scraped.
pub fn status_description(info: &BackoffInfo, now: DateTime<Utc>) -> String {
    if info.total_failures >= MAX_TOTAL_FAILURES {
        return format!(
            "permanently backed off after {} total failures; clear errors to resume",
            info.total_failures
        );
    }
    if now < info.next_allowed_scrape {
        let wait = info.next_allowed_scrape - now;
        return format!(
            "backing off at level {}, next attempt in {}m",
            info.level,
            wait.num_minutes().max(1)
        );
    }
    if info.level > 0 {
        return format!("level {}, ready to scrape", info.level);
    }
    "healthy".to_string()
}

/// Coarse health bucket used by status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanyHealth {
    Healthy,
    /// Erroring often enough to need attention.
    Problematic,
    /// Deep backoff or over the lifetime failure cap.
    Permanent,
}

impl CompanyHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompanyHealth::Healthy => "healthy",
            CompanyHealth::Problematic => "problematic",
            CompanyHealth::Permanent => "permanent",
        }
    }
}

const PROBLEMATIC_ERROR_COUNT: usize = 10;
const PERMANENT_LEVEL: u32 = 3;

pub fn assess_health(recent_errors: &[ScrapingError], info: &BackoffInfo) -> CompanyHealth {
    if info.level >= PERMANENT_LEVEL || info.total_failures >= MAX_TOTAL_FAILURES {
        CompanyHealth::Permanent
    } else if recent_errors.len() >= PROBLEMATIC_ERROR_COUNT {
        CompanyHealth::Problematic
    } else {
        CompanyHealth::Healthy
    }
}
