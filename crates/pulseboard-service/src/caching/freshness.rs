use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::CachePolicy;
use crate::types::{Classification, Report};

/// The freshness window that applies to `report`.
///
/// A report may carry its own `fresh_window_seconds` override; otherwise the
/// policy default applies.
pub fn effective_fresh_window(report: &Report, policy: &CachePolicy) -> Duration {
    report
        .fresh_window_seconds
        .map(Duration::from_secs)
        .unwrap_or(policy.fresh_window)
}

/// Classifies a report by its age at `now`.
///
/// A missing `generated_at` is treated as infinitely old and forces a miss;
/// this function never fails on bad input, it only degrades towards
/// "rebuild".
pub fn classify(report: &Report, policy: &CachePolicy, now: DateTime<Utc>) -> Classification {
    let Some(generated_at) = report.generated_at else {
        return Classification::Miss;
    };

    // A timestamp from the future (clock skew between writers) counts as
    // brand new rather than underflowing.
    let age = now
        .signed_duration_since(generated_at)
        .to_std()
        .unwrap_or(Duration::ZERO);

    let fresh_window = effective_fresh_window(report, policy);
    if age <= fresh_window {
        Classification::Fresh
    } else if age <= fresh_window + policy.stale_window {
        Classification::Stale
    } else {
        Classification::Miss
    }
}
