use chrono::{Datelike, NaiveDate, NaiveTime, TimeDelta, Timelike, Weekday};

use crate::model::{LocalTime, Span};

const SLOT_MINUTES: u32 = 15;

/// Opening hours of the booking day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindowPolicy {
    pub day_start_hour: u32,
    pub day_end_hour: u32,
}

impl Default for TimeWindowPolicy {
    fn default() -> Self {
        Self {
            day_start_hour: 8,
            day_end_hour: 16,
        }
    }
}

fn minute_of_day(t: LocalTime) -> u32 {
    t.hour() * 60 + t.minute()
}

impl TimeWindowPolicy {
    pub fn new(day_start_hour: u32, day_end_hour: u32) -> Self {
        debug_assert!(day_start_hour < day_end_hour && day_end_hour <= 24);
        Self {
            day_start_hour,
            day_end_hour,
        }
    }

    /// Start at or after the opening hour, end at or before the closing hour.
    pub fn is_within_opening_hours(&self, start: LocalTime, end: LocalTime) -> bool {
        minute_of_day(start) >= self.day_start_hour * 60
            && minute_of_day(end) <= self.day_end_hour * 60
    }

    pub fn is_weekday(date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// The bookable window of `date`.
    pub fn day_window(&self, date: NaiveDate) -> Span {
        let open = date.and_time(NaiveTime::MIN) + TimeDelta::hours(self.day_start_hour as i64);
        let close = date.and_time(NaiveTime::MIN) + TimeDelta::hours(self.day_end_hour as i64);
        Span::new(open, close)
    }

    /// Translate a pointer offset (minutes after opening) into a slot of
    /// `duration` on `date`, snapped to the quarter-hour grid and kept inside
    /// the day window. `None` if the duration does not fit the window at all.
    pub fn pick_slot(&self, date: NaiveDate, offset_minutes: u32, duration: TimeDelta) -> Option<Span> {
        let window = self.day_window(date);
        if duration <= TimeDelta::zero() || duration > window.duration() {
            return None;
        }
        let latest = (window.duration() - duration).num_minutes() as u32;
        let snapped = round_to_quarter_hour(offset_minutes).min(latest - latest % SLOT_MINUTES);
        let start = window.start + TimeDelta::minutes(snapped as i64);
        Span::try_new(start, start + duration)
    }
}

/// Round to the nearest multiple of 15, halves rounding up.
pub fn round_to_quarter_hour(minutes: u32) -> u32 {
    minutes.saturating_add(SLOT_MINUTES / 2) / SLOT_MINUTES * SLOT_MINUTES
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> LocalTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn opening_hours_bounds_are_inclusive() {
        let w = TimeWindowPolicy::default();
        assert!(w.is_within_opening_hours(at(8, 0), at(16, 0)));
        assert!(w.is_within_opening_hours(at(9, 0), at(10, 0)));
        assert!(!w.is_within_opening_hours(at(7, 0), at(8, 0)));
        assert!(!w.is_within_opening_hours(at(7, 59), at(9, 0)));
        assert!(!w.is_within_opening_hours(at(15, 0), at(16, 1)));
    }

    #[test]
    fn weekday_detection() {
        let monday = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2026, 10, 24).unwrap();
        let sunday = NaiveDate::from_ymd_opt(2026, 10, 25).unwrap();
        let friday = NaiveDate::from_ymd_opt(2026, 10, 23).unwrap();
        assert!(TimeWindowPolicy::is_weekday(monday));
        assert!(TimeWindowPolicy::is_weekday(friday));
        assert!(!TimeWindowPolicy::is_weekday(saturday));
        assert!(!TimeWindowPolicy::is_weekday(sunday));
    }

    #[test]
    fn quarter_hour_rounding() {
        assert_eq!(round_to_quarter_hour(0), 0);
        assert_eq!(round_to_quarter_hour(7), 0);
        assert_eq!(round_to_quarter_hour(8), 15);
        assert_eq!(round_to_quarter_hour(22), 15);
        assert_eq!(round_to_quarter_hour(23), 30);
        assert_eq!(round_to_quarter_hour(60), 60);
        assert_eq!(round_to_quarter_hour(487), 480);
    }

    #[test]
    fn day_window_uses_configured_hours() {
        let w = TimeWindowPolicy::new(9, 17);
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(w.day_window(date), Span::new(at(9, 0), at(17, 0)));
    }

    #[test]
    fn pick_slot_snaps_and_clamps() {
        let w = TimeWindowPolicy::default();
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        let slot = w.pick_slot(date, 68, TimeDelta::hours(1)).unwrap();
        assert_eq!(slot, Span::new(at(9, 15), at(10, 15)));

        // Past the end of the day: pinned so the slot still ends by closing.
        let slot = w.pick_slot(date, 470, TimeDelta::minutes(90)).unwrap();
        assert_eq!(slot, Span::new(at(14, 30), at(16, 0)));

        assert!(w.pick_slot(date, 0, TimeDelta::hours(9)).is_none());
        assert!(w.pick_slot(date, 0, TimeDelta::zero()).is_none());
    }
}
