use chrono::{DateTime, Days};

use crate::model::{BookingStatus, SlotConflict, Span, StudioState};

use super::capacity::describe;

// ── Overlap Checker ───────────────────────────────────────────────

/// Confirmed bookings whose occupied interval `[start, start+duration)`
/// intersects `query` under half-open semantics: a booking ending exactly at
/// `query.start`, or starting exactly at `query.end`, does not count.
///
/// Intersection is on full timestamps, not calendar-date equality, so a block
/// ending at noon leaves the afternoon's bookings out of the conflict set.
pub fn confirmed_in_range(studio: &StudioState, query: &Span) -> Vec<SlotConflict> {
    let bookings = prune_by_date(studio, query);
    bookings
        .iter()
        .filter(|b| b.status == BookingStatus::Confirmed)
        .filter(|b| {
            studio
                .occupied_span(b)
                .is_some_and(|span| span.overlaps(query))
        })
        .map(|b| describe(studio, b))
        .collect()
}

/// Narrow the sorted booking list to the dates that could intersect `query`.
/// A booking occupies at most one day (`MAX_DURATION_MIN`), so anything dated
/// more than a day before the window starts is out.
fn prune_by_date<'a>(studio: &'a StudioState, query: &Span) -> &'a [crate::model::Booking] {
    let first = match DateTime::from_timestamp_millis(query.start) {
        Some(dt) => dt.date_naive().checked_sub_days(Days::new(1)),
        None => None,
    };
    let last = DateTime::from_timestamp_millis(query.end).map(|dt| dt.date_naive());
    let (Some(first), Some(last)) = (first, last) else {
        return &studio.bookings;
    };
    let lo = studio.bookings.partition_point(|b| b.slot.date < first);
    let hi = studio.bookings.partition_point(|b| b.slot.date <= last);
    &studio.bookings[lo..hi]
}
