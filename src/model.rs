use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{CLOSING_HOUR, OPENING_HOUR, SLOT_MINUTES};

/// Unix milliseconds — the only absolute time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// A bookable unit: one studio-local calendar date plus a time-of-day on the
/// slot grid. Capacity accounting keys on exact `(date, time)` equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl SlotKey {
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self { date, time }
    }

    /// True if the time lands on the slot grid (15-minute boundary, zero seconds).
    pub fn is_aligned(&self) -> bool {
        self.time.second() == 0
            && self.time.nanosecond() == 0
            && self.time.minute() % SLOT_MINUTES == 0
    }

    /// True if the slot starts within business hours. The closing hour itself
    /// is not a valid start.
    pub fn in_business_hours(&self) -> bool {
        self.time.hour() >= OPENING_HOUR && self.time.hour() < CLOSING_HOUR
    }

    /// Absolute start of the slot on the studio-local clock.
    pub fn start_ms(&self) -> Ms {
        self.date.and_time(self.time).and_utc().timestamp_millis()
    }

    /// Occupied interval for a booking of the given service duration.
    /// Duration is authoritative and deliberately not snapped to the grid.
    pub fn occupied_span(&self, duration_min: u32) -> Span {
        let start = self.start_ms();
        Span::new(start, start + duration_min as Ms * MINUTE_MS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// Legal owner-driven transitions. The system itself never moves a
    /// booking out of Confirmed.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    /// Determines a booking's occupied interval.
    pub duration_min: u32,
    pub price_cents: i64,
}

/// Minimal customer identity. Phone is the uniqueness key within a studio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Ulid,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub service_id: Ulid,
    pub customer_id: Ulid,
    pub slot: SlotKey,
    pub status: BookingStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTime {
    pub id: Ulid,
    pub span: Span,
    pub reason: Option<String>,
    pub is_all_day: bool,
}

/// All in-memory state for one studio. Bookings are sorted by `(date, time)`
/// and blocks by `span.start` so range scans can binary-search.
#[derive(Debug, Clone)]
pub struct StudioState {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    /// Max confirmed bookings per slot (1–10).
    pub capacity: u32,
    pub services: Vec<Service>,
    pub customers: Vec<Customer>,
    pub bookings: Vec<Booking>,
    pub blocks: Vec<BlockedTime>,
}

impl StudioState {
    pub fn new(id: Ulid, owner_id: Ulid, name: String, capacity: u32) -> Self {
        Self {
            id,
            owner_id,
            name,
            capacity,
            services: Vec::new(),
            customers: Vec::new(),
            bookings: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn service(&self, id: &Ulid) -> Option<&Service> {
        self.services.iter().find(|s| s.id == *id)
    }

    pub fn customer(&self, id: &Ulid) -> Option<&Customer> {
        self.customers.iter().find(|c| c.id == *id)
    }

    pub fn customer_by_phone(&self, phone: &str) -> Option<&Customer> {
        self.customers.iter().find(|c| c.phone == phone)
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Insert booking maintaining sort order by (date, time).
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.slot.date, booking.slot.time);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.slot.date, b.slot.time))
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    /// All bookings on one calendar date, in time order.
    pub fn bookings_on(&self, date: NaiveDate) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.slot.date < date);
        let hi = self.bookings.partition_point(|b| b.slot.date <= date);
        &self.bookings[lo..hi]
    }

    /// Occupied interval of a booking, derived from its service's duration.
    /// None if the service was removed out from under it.
    pub fn occupied_span(&self, booking: &Booking) -> Option<Span> {
        let service = self.service(&booking.service_id)?;
        Some(booking.slot.occupied_span(service.duration_min))
    }

    /// Insert block maintaining sort order by span.start.
    pub fn insert_block(&mut self, block: BlockedTime) {
        let pos = self
            .blocks
            .binary_search_by_key(&block.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.blocks.insert(pos, block);
    }

    pub fn remove_block(&mut self, id: &Ulid) -> Option<BlockedTime> {
        let pos = self.blocks.iter().position(|b| b.id == *id)?;
        Some(self.blocks.remove(pos))
    }

    /// Blocks whose span overlaps the query window. Everything starting at or
    /// after `query.end` is skipped via binary search.
    pub fn blocks_overlapping(&self, query: &Span) -> impl Iterator<Item = &BlockedTime> {
        let right_bound = self.blocks.partition_point(|b| b.span.start < query.end);
        self.blocks[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StudioCreated {
        id: Ulid,
        owner_id: Ulid,
        name: String,
        capacity: u32,
    },
    StudioUpdated {
        id: Ulid,
        name: String,
        capacity: u32,
    },
    ServiceAdded {
        id: Ulid,
        studio_id: Ulid,
        name: String,
        duration_min: u32,
        price_cents: i64,
    },
    ServiceUpdated {
        id: Ulid,
        studio_id: Ulid,
        name: String,
        duration_min: u32,
        price_cents: i64,
    },
    CustomerUpserted {
        id: Ulid,
        studio_id: Ulid,
        name: String,
        phone: String,
    },
    BookingCreated {
        id: Ulid,
        studio_id: Ulid,
        service_id: Ulid,
        customer_id: Ulid,
        slot: SlotKey,
        status: BookingStatus,
        notes: Option<String>,
    },
    BookingStatusChanged {
        id: Ulid,
        studio_id: Ulid,
        status: BookingStatus,
    },
    BlockAdded {
        id: Ulid,
        studio_id: Ulid,
        span: Span,
        reason: Option<String>,
        is_all_day: bool,
    },
    BlockRemoved {
        id: Ulid,
        studio_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudioInfo {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingInfo {
    pub id: Ulid,
    pub studio_id: Ulid,
    pub customer_name: String,
    pub service_name: String,
    pub slot: SlotKey,
    pub status: BookingStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    pub id: Ulid,
    pub studio_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub reason: Option<String>,
    pub is_all_day: bool,
}

/// One existing booking standing in the way of an admission decision.
/// Carries enough for an operator to decide on an override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotConflict {
    pub booking_id: Ulid,
    pub customer_name: String,
    pub service_name: String,
}

/// Soft-reject payload for a full slot. Not an error: the caller may resubmit
/// with the override flag set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityWarning {
    pub current: usize,
    pub max: u32,
    pub bookings: Vec<SlotConflict>,
}

/// Outcome of booking admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admitted { booking_id: Ulid },
    CapacityFull(CapacityWarning),
}
