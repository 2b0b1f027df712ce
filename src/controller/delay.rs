//! Update gating: allowed windows (by weekday, time of day, and zone) and
//! minimum update frequency.
//!
//! Both gates are pure functions of an injected "now", so tests drive them
//! with a fixed clock. Composition is first-hit-wins: the orchestrator
//! evaluates the window gate first and only consults the frequency gate when
//! the window gate passes.

use std::time::Duration;

use chrono::{DateTime, Datelike, Days, TimeZone, Utc};
use chrono_tz::Tz;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use crate::crd::{parse_hh_mm, UpdateWindow};

/// Decide whether "now" falls outside every allowed update window.
///
/// Returns `(delay, gated)`. With no windows configured updates are always
/// allowed. A window whose zone or times fail to parse is skipped; if every
/// window is malformed the gate fails open.
///
/// The boundary is half-open: a start time is inside the window, the end
/// time is not. The returned delay is the distance to the earliest upcoming
/// window start across all windows, never more than seven days.
pub fn delay_until_allowed(now: DateTime<Utc>, windows: &[UpdateWindow]) -> (Duration, bool) {
    if windows.is_empty() {
        return (Duration::ZERO, false);
    }

    for window in windows {
        let (tz, start, end) = match window_bounds(window) {
            Some(parts) => parts,
            None => continue,
        };
        let local = now.with_timezone(&tz);
        if local.weekday() == window.day_of_week.weekday()
            && local.time() >= start
            && local.time() < end
        {
            return (Duration::ZERO, false);
        }
    }

    let mut next: Option<chrono::Duration> = None;
    for window in windows {
        let (tz, start, _) = match window_bounds(window) {
            Some(parts) => parts,
            None => continue,
        };
        let local_date = now.with_timezone(&tz).date_naive();
        // A start earlier today has its next occurrence the same weekday
        // next week, hence the 0..=7 range.
        for offset in 0..=7u64 {
            let candidate_date = match local_date.checked_add_days(Days::new(offset)) {
                Some(d) => d,
                None => break,
            };
            if candidate_date.weekday() != window.day_of_week.weekday() {
                continue;
            }
            let candidate = match tz
                .from_local_datetime(&candidate_date.and_time(start))
                .earliest()
            {
                Some(dt) => dt.with_timezone(&Utc),
                None => continue,
            };
            if candidate > now {
                let until = candidate - now;
                if next.map_or(true, |best| until < best) {
                    next = Some(until);
                }
                break;
            }
        }
    }

    match next {
        Some(delay) => (delay.to_std().unwrap_or_default(), true),
        // every window failed to parse
        None => (Duration::ZERO, false),
    }
}

fn window_bounds(window: &UpdateWindow) -> Option<(Tz, chrono::NaiveTime, chrono::NaiveTime)> {
    let tz: Tz = window.time_zone.parse().ok()?;
    let start = parse_hh_mm(&window.start_time)?;
    let end = parse_hh_mm(&window.end_time)?;
    Some((tz, start, end))
}

/// Enforce the minimum interval between applied updates.
///
/// Returns `(delay, gated)`. The first reconcile of a VWA is never
/// rate-limited.
pub fn delay_until_frequency(
    now: DateTime<Utc>,
    last_updated: Option<&Time>,
    frequency: chrono::Duration,
) -> (Duration, bool) {
    let last = match last_updated {
        Some(t) => t.0,
        None => return (Duration::ZERO, false),
    };
    let next = last + frequency;
    if now < next {
        ((next - now).to_std().unwrap_or_default(), true)
    } else {
        (Duration::ZERO, false)
    }
}
