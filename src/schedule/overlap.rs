use chrono::TimeDelta;
use ulid::Ulid;

use crate::model::{Booking, Span};

// ── Conflict detection ────────────────────────────────────────────

/// First booking in `room_id` whose span overlaps `candidate`.
///
/// Linear scan, short-circuits on the first hit. Bookings of other rooms are
/// ignored so callers may pass a mixed list.
pub fn find_conflict<'a, I>(room_id: Ulid, candidate: &Span, existing: I) -> Option<&'a Booking>
where
    I: IntoIterator<Item = &'a Booking>,
{
    existing
        .into_iter()
        .find(|b| b.room_id == room_id && b.span.overlaps(candidate))
}

// ── Free windows (advisory availability) ──────────────────────────

/// Free sub-windows of `window` not covered by any booking.
pub fn free_windows(window: &Span, bookings: &[Booking], min_duration: Option<TimeDelta>) -> Vec<Span> {
    let mut busy: Vec<Span> = bookings
        .iter()
        .filter(|b| b.span.overlaps(window))
        .map(|b| b.span)
        .collect();
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);

    let mut free = subtract_intervals(&[*window], &busy);
    if let Some(min) = min_duration {
        free.retain(|s| s.duration() >= min);
    }
    free
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` spans from sorted `base` spans.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
