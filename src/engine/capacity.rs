use crate::model::{BookingStatus, SlotConflict, SlotKey, StudioState};

// ── Capacity Oracle ───────────────────────────────────────────────

/// Count bookings occupying exactly this slot, filtered by status. Read-only;
/// an empty slot counts zero, never errors.
///
/// The status filter is explicit rather than hardwired to Confirmed so call
/// sites that care about pending demand can ask for it.
pub fn slot_count(studio: &StudioState, slot: &SlotKey, status: BookingStatus) -> usize {
    studio
        .bookings_on(slot.date)
        .iter()
        .filter(|b| b.slot.time == slot.time && b.status == status)
        .count()
}

/// The bookings behind a `slot_count`, shaped for an operator-facing warning:
/// id plus customer and service names.
pub fn slot_conflicts(
    studio: &StudioState,
    slot: &SlotKey,
    status: BookingStatus,
) -> Vec<SlotConflict> {
    studio
        .bookings_on(slot.date)
        .iter()
        .filter(|b| b.slot.time == slot.time && b.status == status)
        .map(|b| describe(studio, b))
        .collect()
}

pub(super) fn describe(studio: &StudioState, booking: &crate::model::Booking) -> SlotConflict {
    SlotConflict {
        booking_id: booking.id,
        customer_name: studio
            .customer(&booking.customer_id)
            .map(|c| c.name.clone())
            .unwrap_or_default(),
        service_name: studio
            .service(&booking.service_id)
            .map(|s| s.name.clone())
            .unwrap_or_default(),
    }
}
