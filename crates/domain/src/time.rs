//! Time and timestamp helpers.
//!
//! Two clocks are in play: wall-clock [`Timestamp`]s stamp events for
//! consumers, while [`Monotonic`] instants order advertisements (the wall
//! clock may jump, a scan's "last seen" must not).

use chrono::{DateTime, Utc};

/// UTC timestamp carried by events.
pub type Timestamp = DateTime<Utc>;

/// Monotonic instant used for `last_seen` bookkeeping.
pub type Monotonic = std::time::Instant;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Return the current monotonic instant.
#[must_use]
pub fn monotonic_now() -> Monotonic {
    std::time::Instant::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_return_current_utc_time() {
        let before = Utc::now();
        let ts = now();
        let after = Utc::now();
        assert!(ts >= before);
        assert!(ts <= after);
    }

    #[test]
    fn should_never_go_backwards_on_monotonic_clock() {
        let first = monotonic_now();
        let second = monotonic_now();
        assert!(second >= first);
    }
}
