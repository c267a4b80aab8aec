use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::*;

use super::capacity::slot_count;
use super::overlap::confirmed_in_range;
use super::{Engine, EngineError, SharedStudioState};

impl Engine {
    /// Capacity Oracle at the engine surface. A valid-but-empty slot — or a
    /// studio this engine has never seen — reads as zero, never an error.
    pub async fn slot_usage(
        &self,
        studio_id: Ulid,
        slot: SlotKey,
        status: BookingStatus,
    ) -> usize {
        let st = match self.get_studio(&studio_id) {
            Some(st) => st,
            None => return 0,
        };
        let guard = st.read().await;
        slot_count(&guard, &slot, status)
    }

    /// Overlap Checker at the engine surface: confirmed bookings intersecting
    /// `[start, end)`.
    pub async fn confirmed_bookings_in_range(
        &self,
        studio_id: Ulid,
        span: Span,
    ) -> Result<Vec<SlotConflict>, EngineError> {
        if span.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let st = match self.get_studio(&studio_id) {
            Some(st) => st,
            None => return Ok(vec![]),
        };
        let guard = st.read().await;
        Ok(confirmed_in_range(&guard, &span))
    }

    pub async fn blocked_times(
        &self,
        studio_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<BlockInfo>, EngineError> {
        if end <= start {
            return Err(EngineError::validation("end", "must be after start"));
        }
        if end - start > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let st = match self.get_studio(&studio_id) {
            Some(st) => st,
            None => return Ok(vec![]),
        };
        let guard = st.read().await;
        let query = Span::new(start, end);
        Ok(guard
            .blocks_overlapping(&query)
            .map(|b| BlockInfo {
                id: b.id,
                studio_id,
                start: b.span.start,
                end: b.span.end,
                reason: b.reason.clone(),
                is_all_day: b.is_all_day,
            })
            .collect())
    }

    /// All bookings on one date, in time order, with the customer and service
    /// names a calendar view renders.
    pub async fn bookings_on(
        &self,
        studio_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        let st = match self.get_studio(&studio_id) {
            Some(st) => st,
            None => return Ok(vec![]),
        };
        let guard = st.read().await;
        Ok(guard
            .bookings_on(date)
            .iter()
            .map(|b| BookingInfo {
                id: b.id,
                studio_id,
                customer_name: guard
                    .customer(&b.customer_id)
                    .map(|c| c.name.clone())
                    .unwrap_or_default(),
                service_name: guard
                    .service(&b.service_id)
                    .map(|s| s.name.clone())
                    .unwrap_or_default(),
                slot: b.slot,
                status: b.status,
                notes: b.notes.clone(),
            })
            .collect())
    }

    /// Every studio with its admission settings. Waits out in-flight
    /// mutations per studio; writers hold their lock across the WAL commit,
    /// so `try_read` here would fail on any concurrent write.
    pub async fn list_studios(&self) -> Vec<StudioInfo> {
        let studios: Vec<SharedStudioState> =
            self.state.iter().map(|entry| entry.value().clone()).collect();
        let mut out = Vec::with_capacity(studios.len());
        for st in studios {
            let guard = st.read().await;
            out.push(StudioInfo {
                id: guard.id,
                owner_id: guard.owner_id,
                name: guard.name.clone(),
                capacity: guard.capacity,
            });
        }
        out
    }
}
