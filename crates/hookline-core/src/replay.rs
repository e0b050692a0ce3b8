//! Replay protection: timestamp window + recently-seen signatures.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Default accepted clock skew between sender and receiver.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("timestamp is missing")]
    Missing,

    #[error("timestamp is not RFC 3339 with an explicit offset: {0}")]
    Malformed(String),

    #[error("timestamp is {skew_ms}ms away from now (tolerance {tolerance_ms}ms)")]
    OutOfWindow { skew_ms: i64, tolerance_ms: i64 },
}

/// Parse an ISO-8601 timestamp. A timezone offset (or `Z`) is mandatory, since
/// a local time cannot be ordered against our clock.
pub fn parse_timestamp(ts: &str) -> Result<DateTime<Utc>, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Missing);
    }
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TimestampError::Malformed(format!("{ts:?}: {e}")))
}

/// Accepts `|now - ts| <= tolerance`; both past and future skew count.
pub fn validate_timestamp(
    ts: &str,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> Result<DateTime<Utc>, TimestampError> {
    let parsed = parse_timestamp(ts)?;
    let skew_ms = (now - parsed).num_milliseconds();
    let tolerance_ms = i64::try_from(tolerance.as_millis()).unwrap_or(i64::MAX);
    if skew_ms.saturating_abs() > tolerance_ms {
        return Err(TimestampError::OutOfWindow {
            skew_ms,
            tolerance_ms,
        });
    }
    Ok(parsed)
}

pub fn is_timestamp_valid(ts: &str, now: DateTime<Utc>, tolerance: Duration) -> bool {
    validate_timestamp(ts, now, tolerance).is_ok()
}

/// Short-lived set of signatures (or nonces) already accepted.
///
/// A request stays acceptable while its timestamp is within ±tolerance, so a
/// copy can show up as late as 2×tolerance after the original was seen.
/// Entries are kept that long and pruned lazily on every call, bounding memory
/// to the requests of one window.
#[derive(Debug)]
pub struct ReplayGuard {
    retention: chrono::Duration,
    inner: Mutex<SeenSet>,
}

#[derive(Debug, Default)]
struct SeenSet {
    seen: HashMap<String, DateTime<Utc>>,
    order: VecDeque<(DateTime<Utc>, String)>,
}

impl SeenSet {
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while let Some((seen_at, _)) = self.order.front() {
            if *seen_at >= cutoff {
                break;
            }
            if let Some((seen_at, key)) = self.order.pop_front()
                && self.seen.get(&key) == Some(&seen_at)
            {
                self.seen.remove(&key);
            }
        }
    }
}

impl ReplayGuard {
    pub fn new(tolerance: Duration) -> Self {
        let retention = chrono::Duration::from_std(tolerance * 2)
            .unwrap_or_else(|_| chrono::Duration::seconds(240));
        Self {
            retention,
            inner: Mutex::new(SeenSet::default()),
        }
    }

    /// Check-and-record: `true` if `key` was already seen inside the window.
    pub fn is_replay(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut set = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        set.prune(now - self.retention);

        if set.seen.contains_key(key) {
            return true;
        }
        set.seen.insert(key.to_string(), now);
        set.order.push_back((now, key.to_string()));
        false
    }

    /// Entries currently retained.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::format_timestamp;
    use chrono::TimeZone;
    use rstest::rstest;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    #[rstest]
    #[case::exact(0, true)]
    #[case::past_edge(-120, true)]
    #[case::future_edge(120, true)]
    #[case::past_121(-121, false)]
    #[case::future_121(121, false)]
    #[case::way_old(-200, false)]
    fn window_is_inclusive_120s(#[case] offset_secs: i64, #[case] ok: bool) {
        let ts = format_timestamp(now() + chrono::Duration::seconds(offset_secs));
        assert_eq!(is_timestamp_valid(&ts, now(), DEFAULT_TOLERANCE), ok, "{ts}");
    }

    #[rstest]
    #[case::empty("")]
    #[case::garbage("not-a-date")]
    #[case::no_timezone("2025-03-01T09:00:00")]
    #[case::date_only("2025-03-01")]
    #[case::unix_seconds("1740819600")]
    fn malformed_timestamps_are_rejected(#[case] ts: &str) {
        let err = validate_timestamp(ts, now(), DEFAULT_TOLERANCE).unwrap_err();
        assert!(matches!(
            err,
            TimestampError::Malformed(_) | TimestampError::Missing
        ));
    }

    #[test]
    fn offsets_other_than_utc_are_normalised() {
        let parsed = validate_timestamp("2025-03-01T05:00:30-04:00", now(), DEFAULT_TOLERANCE)
            .unwrap();
        assert_eq!(parsed, now() + chrono::Duration::seconds(30));
    }

    #[test]
    fn second_sighting_is_a_replay() {
        let guard = ReplayGuard::default();
        assert!(!guard.is_replay("sig-a", now()));
        assert!(guard.is_replay("sig-a", now() + chrono::Duration::seconds(10)));
        assert!(!guard.is_replay("sig-b", now()));
    }

    #[test]
    fn entries_are_pruned_after_the_window() {
        let guard = ReplayGuard::new(Duration::from_secs(120));
        assert!(!guard.is_replay("sig-a", now()));
        assert!(!guard.is_replay("sig-b", now() + chrono::Duration::seconds(100)));
        assert_eq!(guard.len(), 2);

        // sig-a is older than 2×tolerance by now; sig-b is not
        let later = now() + chrono::Duration::seconds(241);
        assert!(!guard.is_replay("sig-c", later));
        assert_eq!(guard.len(), 2);
        assert!(guard.is_replay("sig-b", later));
        assert!(!guard.is_replay("sig-a", later + chrono::Duration::seconds(1)));
    }

    #[test]
    fn concurrent_callers_see_exactly_one_first_sighting() {
        let guard = Arc::new(ReplayGuard::default());
        let firsts: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let guard = Arc::clone(&guard);
                    s.spawn(move || usize::from(!guard.is_replay("same-sig", now())))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(firsts, 1);
    }
}
