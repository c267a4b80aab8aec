use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::capacity::{slot_conflicts, slot_count};
use super::overlap::confirmed_in_range;
use super::{Engine, EngineError};

/// Who is placing the booking. Owners book on behalf of walk-in customers and
/// get Confirmed immediately; self-service requests enter as Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingOrigin {
    Owner,
    Customer,
}

/// Input to booking admission. Ids are caller-generated so a retry of a
/// failed attempt re-evaluates capacity fresh without minting a new identity.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub id: Ulid,
    pub studio_id: Ulid,
    pub customer_name: String,
    pub customer_phone: String,
    pub service_id: Ulid,
    pub slot: SlotKey,
    pub notes: Option<String>,
    pub origin: BookingOrigin,
    /// Explicit operator instruction to exceed capacity for this slot.
    pub override_capacity: bool,
}

fn validate_booking_request(req: &BookingRequest) -> Result<(), EngineError> {
    if req.customer_name.trim().is_empty() {
        return Err(EngineError::validation("customer_name", "must not be empty"));
    }
    if req.customer_name.len() > MAX_NAME_LEN {
        return Err(EngineError::validation("customer_name", "too long"));
    }
    if req.customer_phone.trim().is_empty() {
        return Err(EngineError::validation("customer_phone", "must not be empty"));
    }
    if req.customer_phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::validation("customer_phone", "too long"));
    }
    if let Some(notes) = &req.notes
        && notes.len() > MAX_NOTES_LEN
    {
        return Err(EngineError::validation("notes", "too long"));
    }
    if !req.slot.is_aligned() {
        return Err(EngineError::validation(
            "time",
            "must start on a 15-minute boundary",
        ));
    }
    if !req.slot.in_business_hours() {
        return Err(EngineError::validation(
            "time",
            "outside business hours (08:00-20:00)",
        ));
    }
    Ok(())
}

fn validate_block_span(span: &Span) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(EngineError::validation(
            "end_time",
            "must be after start_time",
        ));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("blocked interval too wide"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_studio(
        &self,
        id: Ulid,
        owner_id: Ulid,
        name: String,
        capacity: u32,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_STUDIOS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many studios"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("studio name too long"));
        }
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
            return Err(EngineError::validation("capacity", "must be between 1 and 10"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::StudioCreated {
            id,
            owner_id,
            name: name.clone(),
            capacity,
        };
        self.wal_append(&event).await?;
        let st = StudioState::new(id, owner_id, name, capacity);
        self.state
            .insert(id, std::sync::Arc::new(tokio::sync::RwLock::new(st)));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Owner settings action. The new capacity applies to all future
    /// admission checks immediately; existing bookings are left alone.
    pub async fn update_studio(
        &self,
        id: Ulid,
        name: String,
        capacity: u32,
    ) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("studio name too long"));
        }
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
            return Err(EngineError::validation("capacity", "must be between 1 and 10"));
        }
        let st = self.get_studio(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = st.write().await;

        let event = Event::StudioUpdated { id, name, capacity };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    pub async fn add_service(
        &self,
        id: Ulid,
        studio_id: Ulid,
        name: String,
        duration_min: u32,
        price_cents: i64,
    ) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name too long"));
        }
        if duration_min == 0 || duration_min > MAX_DURATION_MIN {
            return Err(EngineError::validation("duration_min", "must be 1-1440 minutes"));
        }
        let st = self
            .get_studio(&studio_id)
            .ok_or(EngineError::NotFound(studio_id))?;
        let mut guard = st.write().await;
        if guard.services.len() >= MAX_SERVICES_PER_STUDIO {
            return Err(EngineError::LimitExceeded("too many services on studio"));
        }
        if guard.service(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ServiceAdded {
            id,
            studio_id,
            name,
            duration_min,
            price_cents,
        };
        self.persist_and_apply(studio_id, &mut guard, &event).await
    }

    /// Owner edit. Duration changes affect the occupied interval of every
    /// booking referencing the service, including existing ones.
    pub async fn update_service(
        &self,
        studio_id: Ulid,
        id: Ulid,
        name: String,
        duration_min: u32,
        price_cents: i64,
    ) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name too long"));
        }
        if duration_min == 0 || duration_min > MAX_DURATION_MIN {
            return Err(EngineError::validation("duration_min", "must be 1-1440 minutes"));
        }
        let st = self
            .get_studio(&studio_id)
            .ok_or(EngineError::NotFound(studio_id))?;
        let mut guard = st.write().await;
        if guard.service(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::ServiceUpdated {
            id,
            studio_id,
            name,
            duration_min,
            price_cents,
        };
        self.persist_and_apply(studio_id, &mut guard, &event).await
    }

    /// Booking admission. Validation happens before any store access; the
    /// capacity check and the commit happen under one studio write lock, so
    /// two racing requests serialize and the loser sees the winner's booking.
    ///
    /// A full slot without the override flag returns `CapacityFull` and
    /// writes nothing — not even the customer upsert.
    ///
    /// The customer upsert and the booking commit are separate WAL appends:
    /// a store failure between them durably keeps a customer with no
    /// booking. The upsert is keyed on phone, so a retried request reuses
    /// that record instead of duplicating it.
    pub async fn create_booking(
        &self,
        req: BookingRequest,
    ) -> Result<AdmissionDecision, EngineError> {
        validate_booking_request(&req)?;

        let st = self
            .get_studio(&req.studio_id)
            .ok_or(EngineError::NotFound(req.studio_id))?;
        let mut guard = st.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_STUDIO {
            return Err(EngineError::LimitExceeded("too many bookings on studio"));
        }
        if guard.service(&req.service_id).is_none() {
            return Err(EngineError::NotFound(req.service_id));
        }

        let current = slot_count(&guard, &req.slot, BookingStatus::Confirmed);
        if current >= guard.capacity as usize && !req.override_capacity {
            metrics::counter!(crate::observability::CAPACITY_WARNINGS_TOTAL).increment(1);
            return Ok(AdmissionDecision::CapacityFull(CapacityWarning {
                current,
                max: guard.capacity,
                bookings: slot_conflicts(&guard, &req.slot, BookingStatus::Confirmed),
            }));
        }

        // Resolve-or-create the customer. Atomic under the same lock as the
        // booking insert, so two racing requests with a brand-new phone
        // number cannot create duplicates.
        let customer_id = match guard.customer_by_phone(&req.customer_phone) {
            Some(existing) => existing.id,
            None => Ulid::new(),
        };
        let customer_event = Event::CustomerUpserted {
            id: customer_id,
            studio_id: req.studio_id,
            name: req.customer_name.clone(),
            phone: req.customer_phone.clone(),
        };
        self.persist_and_apply(req.studio_id, &mut guard, &customer_event)
            .await?;

        let status = match req.origin {
            BookingOrigin::Owner => BookingStatus::Confirmed,
            BookingOrigin::Customer => BookingStatus::Pending,
        };
        let event = Event::BookingCreated {
            id: req.id,
            studio_id: req.studio_id,
            service_id: req.service_id,
            customer_id,
            slot: req.slot,
            status,
            notes: req.notes,
        };
        self.persist_and_apply(req.studio_id, &mut guard, &event)
            .await?;

        metrics::counter!(
            crate::observability::BOOKINGS_ADMITTED_TOTAL,
            "override" => if req.override_capacity { "true" } else { "false" }
        )
        .increment(1);
        Ok(AdmissionDecision::Admitted { booking_id: req.id })
    }

    /// Owner-driven lifecycle transition. Pending→Confirmed,
    /// Pending→Cancelled and Confirmed→Cancelled only.
    pub async fn set_booking_status(
        &self,
        booking_id: Ulid,
        status: BookingStatus,
    ) -> Result<Ulid, EngineError> {
        let (studio_id, mut guard) = self.resolve_entity_write(&booking_id).await?;
        let booking = guard
            .booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if !booking.status.can_transition_to(status) {
            return Err(EngineError::validation("status", "illegal transition"));
        }

        let event = Event::BookingStatusChanged {
            id: booking_id,
            studio_id,
            status,
        };
        self.persist_and_apply(studio_id, &mut guard, &event).await?;
        Ok(studio_id)
    }

    /// Block admission. Rejects — never overrides — when any confirmed
    /// booking's occupied interval intersects the requested one. The operator
    /// must cancel those bookings first.
    pub async fn create_block(
        &self,
        id: Ulid,
        studio_id: Ulid,
        span: Span,
        reason: Option<String>,
        is_all_day: bool,
    ) -> Result<(), EngineError> {
        validate_block_span(&span)?;
        if let Some(r) = &reason
            && r.len() > MAX_REASON_LEN
        {
            return Err(EngineError::validation("reason", "too long"));
        }
        let st = self
            .get_studio(&studio_id)
            .ok_or(EngineError::NotFound(studio_id))?;
        let mut guard = st.write().await;
        if guard.blocks.len() >= MAX_BLOCKS_PER_STUDIO {
            return Err(EngineError::LimitExceeded("too many blocks on studio"));
        }

        let conflicts = confirmed_in_range(&guard, &span);
        if !conflicts.is_empty() {
            metrics::counter!(crate::observability::BLOCK_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict {
                count: conflicts.len(),
                bookings: conflicts,
            });
        }

        let event = Event::BlockAdded {
            id,
            studio_id,
            span,
            reason,
            is_all_day,
        };
        self.persist_and_apply(studio_id, &mut guard, &event).await
    }

    /// Block revocation. A block holds no bookings, so once ownership checks
    /// out the delete is unconditional.
    pub async fn delete_block(
        &self,
        block_id: Ulid,
        requesting_owner: Ulid,
    ) -> Result<Ulid, EngineError> {
        let (studio_id, mut guard) = self.resolve_entity_write(&block_id).await?;
        if guard.owner_id != requesting_owner {
            return Err(EngineError::NotOwner(block_id));
        }

        let event = Event::BlockRemoved {
            id: block_id,
            studio_id,
        };
        self.persist_and_apply(studio_id, &mut guard, &event).await?;
        Ok(studio_id)
    }
}
