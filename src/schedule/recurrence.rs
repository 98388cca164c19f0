use chrono::{Days, Months, NaiveDate};

use crate::model::RecurrenceType;

/// Expand a recurrence into concrete dates, `start..=end`, ascending.
///
/// Every occurrence is computed from `start` (the k-th monthly occurrence is
/// `start + k months`, clamped to the month's length), so month-end anchors
/// do not drift. Empty when `start > end`.
pub fn expand_recurrence(start: NaiveDate, end: NaiveDate, recurrence: RecurrenceType) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut k: u32 = 0;
    while let Some(date) = nth_occurrence(start, recurrence, k) {
        if date > end {
            break;
        }
        dates.push(date);
        k += 1;
    }
    dates.dedup();
    dates
}

fn nth_occurrence(start: NaiveDate, recurrence: RecurrenceType, k: u32) -> Option<NaiveDate> {
    match recurrence {
        RecurrenceType::Daily => start.checked_add_days(Days::new(k as u64)),
        RecurrenceType::Weekly => start.checked_add_days(Days::new(7 * k as u64)),
        RecurrenceType::Biweekly => start.checked_add_days(Days::new(14 * k as u64)),
        RecurrenceType::Monthly => start.checked_add_months(Months::new(k)),
    }
}
