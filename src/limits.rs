//! Structural limits. These are hard caps, not tunables: exceeding any of
//! them indicates misuse or a runaway client, never a legitimate workload.

use crate::model::Ms;

/// Parallel treatment resources per studio.
pub const MIN_CAPACITY: u32 = 1;
pub const MAX_CAPACITY: u32 = 10;

/// Slot granularity: bookings start on 15-minute boundaries.
pub const SLOT_MINUTES: u32 = 15;

/// Business hours, studio-local. A slot must start at or after opening
/// and strictly before closing.
pub const OPENING_HOUR: u32 = 8;
pub const CLOSING_HOUR: u32 = 20;

/// A service occupies at most one day. Lets range scans prune by date.
pub const MAX_DURATION_MIN: u32 = 24 * 60;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_NOTES_LEN: usize = 2048;
pub const MAX_REASON_LEN: usize = 512;

pub const MAX_STUDIOS_PER_TENANT: usize = 1024;
pub const MAX_SERVICES_PER_STUDIO: usize = 256;
pub const MAX_BOOKINGS_PER_STUDIO: usize = 100_000;
pub const MAX_BLOCKS_PER_STUDIO: usize = 10_000;

/// Widest window a blocked-time or listing query may span (one year).
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

/// Sanity bounds on absolute timestamps (2000-01-01 .. 2100-01-01 UTC).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 256;
