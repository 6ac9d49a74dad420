//! Freshness rule for cached records.
//!
//! Staleness is never stored. It is derived at read time from the record's
//! sync timestamp and the configured TTL.

use chrono::{DateTime, Duration, Utc};

use crate::record::ProductRecord;

/// Whether a record synced at `last_synced_at` (or created at `created_at`)
/// needs a refresh at `now`.
///
/// A TTL of zero or less disables expiry. A record with neither timestamp is
/// always stale. The comparison is strict: a record exactly `ttl_hours` old is
/// still fresh.
pub fn is_stale(
    last_synced_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    ttl_hours: i64,
    now: DateTime<Utc>,
) -> bool {
    if ttl_hours <= 0 {
        return false;
    }
    let Some(reference) = last_synced_at.or(created_at) else {
        return true;
    };
    let ttl = Duration::try_hours(ttl_hours).unwrap_or(Duration::MAX);
    now.signed_duration_since(reference) > ttl
}

impl ProductRecord {
    pub fn is_stale(&self, ttl_hours: i64, now: DateTime<Utc>) -> bool {
        is_stale(
            Some(self.last_synced_at),
            Some(self.created_at),
            ttl_hours,
            now,
        )
    }

    /// Time since the last sync, clamped at zero for clock skew.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_synced_at)
            .max(Duration::zero())
    }
}
