//! Lease lock models

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Parameters written into the lease on every acquire or renew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseParams {
    /// How long other replicas must wait after the last renewal before they
    /// may claim the lease
    pub lease_duration: Duration,
}

impl LeaseParams {
    /// Parameters for a lease held for `lease_duration` after each renewal.
    pub fn new(lease_duration: Duration) -> Self {
        Self { lease_duration }
    }

    /// Lease duration in whole seconds as stored in `leaseDurationSeconds`
    /// (rounded up, at least 1).
    pub fn lease_duration_seconds(&self) -> i32 {
        let secs = self.lease_duration.as_secs()
            + u64::from(self.lease_duration.subsec_nanos() > 0);
        i32::try_from(secs.max(1)).unwrap_or(i32::MAX)
    }
}

/// Result of one acquire-or-renew round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseObservation {
    /// Holder named by the lease after this round (`None` if the lease is
    /// free or the holder could not be determined)
    pub holder: Option<String>,

    /// Whether the caller holds the lease after this round
    pub acquired: bool,
}

impl LeaseObservation {
    /// The caller holds the lease.
    pub fn acquired(identity: &str) -> Self {
        Self {
            holder: Some(identity.to_string()),
            acquired: true,
        }
    }

    /// Someone else (or nobody) holds the lease.
    pub fn held_by(holder: Option<String>) -> Self {
        Self {
            holder,
            acquired: false,
        }
    }
}

/// Whether a lease renewed at `renew_time` for `duration_seconds` has lapsed
/// at `now`.
///
/// A lease missing either field is treated as expired.
pub fn lease_expired(
    renew_time: Option<DateTime<Utc>>,
    duration_seconds: Option<i32>,
    now: DateTime<Utc>,
) -> bool {
    match (renew_time, duration_seconds) {
        (Some(renewed), Some(duration)) => {
            now > renewed + chrono::Duration::seconds(i64::from(duration))
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_duration_seconds_rounds_up() {
        assert_eq!(LeaseParams::new(Duration::from_secs(18)).lease_duration_seconds(), 18);
        assert_eq!(LeaseParams::new(Duration::from_millis(1500)).lease_duration_seconds(), 2);
        assert_eq!(LeaseParams::new(Duration::from_millis(10)).lease_duration_seconds(), 1);
        assert_eq!(LeaseParams::new(Duration::ZERO).lease_duration_seconds(), 1);
    }

    #[test]
    fn test_lease_expired() {
        let renewed = Utc::now();

        assert!(!lease_expired(Some(renewed), Some(18), renewed));
        assert!(!lease_expired(
            Some(renewed),
            Some(18),
            renewed + chrono::Duration::seconds(18)
        ));
        assert!(lease_expired(
            Some(renewed),
            Some(18),
            renewed + chrono::Duration::seconds(19)
        ));
    }

    #[test]
    fn test_lease_missing_fields_is_expired() {
        let now = Utc::now();
        assert!(lease_expired(None, Some(18), now));
        assert!(lease_expired(Some(now), None, now));
    }
}
