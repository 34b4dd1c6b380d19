// Cooldown window computation

use crate::provider::Provider;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use serde::Serialize;
use std::time::Duration;

/// Derived view of one account's cooldown, recomputed from the record
/// rather than persisted on its own.
#[derive(Debug, Clone, Serialize)]
pub struct CooldownWindow {
    pub provider: Provider,
    pub account_id: String,
    pub until: DateTime<Utc>,
    pub reason: String,
}

/// Next occurrence of the provider's daily reset hour (UTC), strictly in
/// the future.
pub fn next_reset_boundary(reset_hour: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let reset_hour = reset_hour % 24;
    let today = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), reset_hour, 0, 0)
        .single()
        .unwrap_or(now);

    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// When an account cooled at `now` becomes usable again. An explicit
/// retry-after from the provider always wins over the daily boundary.
pub fn cooldown_until(
    retry_after: Option<Duration>,
    reset_hour: u32,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match retry_after {
        Some(delay) => now + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::seconds(60)),
        None => next_reset_boundary(reset_hour, now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_is_later_today_when_hour_ahead() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 6, 30, 0).unwrap();
        let boundary = next_reset_boundary(9, now);
        assert_eq!(boundary, Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap());
    }

    #[test]
    fn boundary_rolls_to_tomorrow_when_hour_passed() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let boundary = next_reset_boundary(9, now);
        assert_eq!(boundary, Utc.with_ymd_and_hms(2026, 3, 11, 9, 0, 0).unwrap());
    }

    #[test]
    fn midnight_default_rolls_to_next_day() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        let boundary = next_reset_boundary(0, now);
        assert_eq!(boundary, Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap());
    }

    #[test]
    fn retry_after_wins_over_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 6, 0, 0).unwrap();
        let until = cooldown_until(Some(Duration::from_secs(90)), 9, now);
        assert_eq!(until, now + ChronoDuration::seconds(90));
    }

    #[test]
    fn no_retry_after_falls_back_to_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 6, 0, 0).unwrap();
        let until = cooldown_until(None, 9, now);
        assert_eq!(until, Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap());
    }
}
