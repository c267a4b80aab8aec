mod admission;
mod capacity;
mod error;
mod overlap;
mod queries;
#[cfg(test)]
mod tests;

pub use admission::{BookingOrigin, BookingRequest};
pub use capacity::{slot_conflicts, slot_count};
pub use error::EngineError;
pub use overlap::confirmed_in_range;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::RevalidateHub;
use crate::wal::Wal;

pub type SharedStudioState = Arc<RwLock<StudioState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes don't
    // leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One tenant's scheduling engine: the studios, their bookings and blocks,
/// and the WAL that makes commits durable. All admission decisions happen
/// under the target studio's write lock.
pub struct Engine {
    pub state: DashMap<Ulid, SharedStudioState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<RevalidateHub>,
    /// Reverse lookup: entity (booking/block) id → studio id
    pub(super) entity_to_studio: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a StudioState (no locking — caller holds the lock).
fn apply_to_studio(st: &mut StudioState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::StudioUpdated { name, capacity, .. } => {
            st.name = name.clone();
            st.capacity = *capacity;
        }
        Event::ServiceAdded {
            id,
            name,
            duration_min,
            price_cents,
            ..
        } => {
            st.services.push(Service {
                id: *id,
                name: name.clone(),
                duration_min: *duration_min,
                price_cents: *price_cents,
            });
        }
        Event::ServiceUpdated {
            id,
            name,
            duration_min,
            price_cents,
            ..
        } => {
            if let Some(service) = st.services.iter_mut().find(|s| s.id == *id) {
                service.name = name.clone();
                service.duration_min = *duration_min;
                service.price_cents = *price_cents;
            }
        }
        Event::CustomerUpserted { id, name, phone, .. } => {
            if let Some(existing) = st.customers.iter_mut().find(|c| c.phone == *phone) {
                existing.name = name.clone();
            } else {
                st.customers.push(Customer {
                    id: *id,
                    name: name.clone(),
                    phone: phone.clone(),
                });
            }
        }
        Event::BookingCreated {
            id,
            studio_id,
            service_id,
            customer_id,
            slot,
            status,
            notes,
        } => {
            st.insert_booking(Booking {
                id: *id,
                service_id: *service_id,
                customer_id: *customer_id,
                slot: *slot,
                status: *status,
                notes: notes.clone(),
            });
            entity_map.insert(*id, *studio_id);
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(booking) = st.booking_mut(id) {
                booking.status = *status;
            }
        }
        Event::BlockAdded {
            id,
            studio_id,
            span,
            reason,
            is_all_day,
        } => {
            st.insert_block(BlockedTime {
                id: *id,
                span: *span,
                reason: reason.clone(),
                is_all_day: *is_all_day,
            });
            entity_map.insert(*id, *studio_id);
        }
        Event::BlockRemoved { id, .. } => {
            st.remove_block(id);
            entity_map.remove(id);
        }
        // StudioCreated is handled at the DashMap level, not here
        Event::StudioCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<RevalidateHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_studio: DashMap::new(),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may
        // run inside an async context (lazy tenant creation).
        for event in &events {
            match event {
                Event::StudioCreated {
                    id,
                    owner_id,
                    name,
                    capacity,
                } => {
                    let st = StudioState::new(*id, *owner_id, name.clone(), *capacity);
                    engine.state.insert(*id, Arc::new(RwLock::new(st)));
                }
                other => {
                    if let Some(studio_id) = event_studio_id(other)
                        && let Some(entry) = engine.state.get(&studio_id)
                    {
                        let st_arc = entry.clone();
                        let mut guard = st_arc.try_write().expect("replay: uncontended write");
                        apply_to_studio(&mut guard, other, &engine.entity_to_studio);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn get_studio(&self, id: &Ulid) -> Option<SharedStudioState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_studio_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_studio.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. The caller holds the studio's
    /// write lock, which is what makes check-then-commit atomic.
    pub(super) async fn persist_and_apply(
        &self,
        studio_id: Ulid,
        st: &mut StudioState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_studio(st, event, &self.entity_to_studio);
        self.notify.send(studio_id, event);
        Ok(())
    }

    /// Lookup entity → studio, get studio, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<StudioState>), EngineError> {
        let studio_id = self
            .get_studio_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let st = self
            .get_studio(&studio_id)
            .ok_or(EngineError::NotFound(studio_id))?;
        let guard = st.write_owned().await;
        Ok((studio_id, guard))
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Removed blocks and superseded status
    /// changes drop out entirely.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let studio_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in studio_ids {
            let entry = match self.state.get(&id) {
                Some(e) => e,
                None => continue,
            };
            let st_arc = entry.value().clone();
            let guard = st_arc.read().await;

            events.push(Event::StudioCreated {
                id: guard.id,
                owner_id: guard.owner_id,
                name: guard.name.clone(),
                capacity: guard.capacity,
            });
            for s in &guard.services {
                events.push(Event::ServiceAdded {
                    id: s.id,
                    studio_id: guard.id,
                    name: s.name.clone(),
                    duration_min: s.duration_min,
                    price_cents: s.price_cents,
                });
            }
            for c in &guard.customers {
                events.push(Event::CustomerUpserted {
                    id: c.id,
                    studio_id: guard.id,
                    name: c.name.clone(),
                    phone: c.phone.clone(),
                });
            }
            for b in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    studio_id: guard.id,
                    service_id: b.service_id,
                    customer_id: b.customer_id,
                    slot: b.slot,
                    status: b.status,
                    notes: b.notes.clone(),
                });
            }
            for blk in &guard.blocks {
                events.push(Event::BlockAdded {
                    id: blk.id,
                    studio_id: guard.id,
                    span: blk.span,
                    reason: blk.reason.clone(),
                    is_all_day: blk.is_all_day,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the studio_id from an event (for non-Create events).
fn event_studio_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ServiceAdded { studio_id, .. }
        | Event::ServiceUpdated { studio_id, .. }
        | Event::CustomerUpserted { studio_id, .. }
        | Event::BookingCreated { studio_id, .. }
        | Event::BookingStatusChanged { studio_id, .. }
        | Event::BlockAdded { studio_id, .. }
        | Event::BlockRemoved { studio_id, .. } => Some(*studio_id),
        Event::StudioUpdated { id, .. } => Some(*id),
        Event::StudioCreated { .. } => None,
    }
}
