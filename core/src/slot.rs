//! Slot Clock
//!
//! Quantises wall-clock time into 15-minute UTC slots. Pure function of the
//! clock; no I/O. The slot identifier doubles as the cache key suffix and
//! the lock key suffix used throughout the rest of the system.

use chrono::{DateTime, Duration, Timelike, Utc};
use std::fmt;

pub const SLOT_MINUTES: i64 = 15;

/// The start instant of a 15-minute UTC slot, identified by its ISO-8601
/// timestamp (seconds and millis zeroed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(DateTime<Utc>);

impl SlotId {
    /// The slot containing `now`.
    pub fn containing(now: DateTime<Utc>) -> Self {
        let floored_minute = (now.minute() as i64 / SLOT_MINUTES) * SLOT_MINUTES;
        let start = now
            .with_minute(0)
            .unwrap()
            .with_second(0)
            .unwrap()
            .with_nanosecond(0)
            .unwrap()
            + Duration::minutes(floored_minute);
        SlotId(start)
    }

    /// The current slot, per the system clock.
    pub fn current() -> Self {
        Self::containing(Utc::now())
    }

    pub fn next(self) -> Self {
        SlotId(self.0 + Duration::minutes(SLOT_MINUTES))
    }

    pub fn timestamp(self) -> DateTime<Utc> {
        self.0
    }

    /// Minutes between `self` and an earlier `other` slot. Negative if
    /// `other` is actually later.
    pub fn minutes_since(self, other: SlotId) -> i64 {
        (self.0 - other.0).num_minutes()
    }

    pub fn parse(iso: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(iso)
            .ok()
            .map(|dt| SlotId(dt.with_timezone(&Utc)))
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.0.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        )
    }
}

/// Age of a past slot relative to the current instant, in minutes. Used by
/// GRACE and the offline-confirmation gate.
pub fn age_minutes(slot: SlotId, now: DateTime<Utc>) -> i64 {
    (now - slot.timestamp()).num_minutes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn floors_to_quarter_hour() {
        let t = Utc.with_ymd_and_hms(2026, 7, 31, 10, 7, 42).unwrap();
        let slot = SlotId::containing(t);
        assert_eq!(slot.to_string(), "2026-07-31T10:00:00Z");

        let t2 = Utc.with_ymd_and_hms(2026, 7, 31, 10, 44, 59).unwrap();
        assert_eq!(SlotId::containing(t2).to_string(), "2026-07-31T10:30:00Z");
    }

    #[test]
    fn next_advances_one_slot() {
        let t = Utc.with_ymd_and_hms(2026, 7, 31, 10, 0, 0).unwrap();
        let slot = SlotId::containing(t);
        assert_eq!(slot.next().to_string(), "2026-07-31T10:15:00Z");
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let t = Utc.with_ymd_and_hms(2026, 7, 31, 10, 30, 0).unwrap();
        let slot = SlotId::containing(t);
        let parsed = SlotId::parse(&slot.to_string()).unwrap();
        assert_eq!(slot, parsed);
    }
}
