//! Request/response surface of the wire protocol. Requests arrive as one
//! JSON object per line; identifiers and timestamps travel as strings and
//! are parsed here, so the engine only ever sees typed values.

use chrono::{DateTime, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use ulid::Ulid;

use crate::engine::{BookingOrigin, BookingRequest, Engine, EngineError};
use crate::model::*;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateStudio {
        owner_id: String,
        name: String,
        capacity: u32,
    },
    UpdateStudio {
        studio_id: String,
        name: String,
        capacity: u32,
    },
    AddService {
        studio_id: String,
        name: String,
        duration_min: u32,
        price_cents: i64,
    },
    UpdateService {
        studio_id: String,
        service_id: String,
        name: String,
        duration_min: u32,
        price_cents: i64,
    },
    /// Owner-side booking. Enters Confirmed and may carry the capacity
    /// override flag.
    CreateManualBooking {
        studio_id: String,
        service_id: String,
        customer_name: String,
        customer_phone: String,
        date: String,
        time: String,
        #[serde(default)]
        notes: Option<String>,
        #[serde(default)]
        override_capacity: bool,
    },
    /// Customer self-service booking. Enters Pending; no override.
    RequestBooking {
        studio_id: String,
        service_id: String,
        customer_name: String,
        customer_phone: String,
        date: String,
        time: String,
        #[serde(default)]
        notes: Option<String>,
    },
    SetBookingStatus {
        booking_id: String,
        status: BookingStatus,
    },
    BlockTime {
        studio_id: String,
        start_time: String,
        end_time: String,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        is_all_day: bool,
    },
    UnblockTime {
        block_id: String,
        owner_id: String,
    },
    GetBlockedTimes {
        studio_id: String,
        start_time: String,
        end_time: String,
    },
    GetBookings {
        studio_id: String,
        date: String,
    },
    GetSlotUsage {
        studio_id: String,
        date: String,
        time: String,
        #[serde(default = "confirmed")]
        status: BookingStatus,
    },
    ListStudios,
}

fn confirmed() -> BookingStatus {
    BookingStatus::Confirmed
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    /// Soft reject: the slot is full but the caller may resubmit the same
    /// booking with `override_capacity` set.
    CapacityFull { warning: CapacityWarning },
    Error {
        code: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        conflicts: Vec<SlotConflict>,
    },
}

impl Response {
    fn ok() -> Self {
        Response::Ok { data: None }
    }

    fn ok_with(data: Value) -> Self {
        Response::Ok { data: Some(data) }
    }

    fn ok_data<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => Response::Ok { data: Some(v) },
            Err(e) => Response::Error {
                code: "internal",
                message: e.to_string(),
                conflicts: Vec::new(),
            },
        }
    }
}

impl From<EngineError> for Response {
    fn from(e: EngineError) -> Self {
        let code = match &e {
            EngineError::Validation { .. } => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::NotOwner(_) => "not_owner",
            EngineError::Conflict { .. } => "booking_conflict",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Wal(_) => "internal",
        };
        let message = e.to_string();
        let conflicts = match e {
            EngineError::Conflict { bookings, .. } => bookings,
            _ => Vec::new(),
        };
        Response::Error {
            code,
            message,
            conflicts,
        }
    }
}

// ── Field parsing ────────────────────────────────────────

fn parse_ulid(field: &'static str, s: &str) -> Result<Ulid, EngineError> {
    Ulid::from_string(s).map_err(|_| EngineError::validation(field, "not a valid ULID"))
}

fn parse_date(field: &'static str, s: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| EngineError::validation(field, "expected YYYY-MM-DD"))
}

fn parse_time(field: &'static str, s: &str) -> Result<NaiveTime, EngineError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| EngineError::validation(field, "expected HH:MM"))
}

fn parse_instant(field: &'static str, s: &str) -> Result<Ms, EngineError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.timestamp_millis())
        .map_err(|_| EngineError::validation(field, "expected RFC 3339 timestamp"))
}

// ── Dispatch ─────────────────────────────────────────────

pub async fn dispatch(engine: &Engine, req: Request) -> Response {
    match run(engine, req).await {
        Ok(resp) => resp,
        Err(e) => e.into(),
    }
}

async fn run(engine: &Engine, req: Request) -> Result<Response, EngineError> {
    match req {
        Request::CreateStudio {
            owner_id,
            name,
            capacity,
        } => {
            let owner_id = parse_ulid("owner_id", &owner_id)?;
            let id = Ulid::new();
            engine.create_studio(id, owner_id, name, capacity).await?;
            Ok(Response::ok_with(json!({ "studio_id": id.to_string() })))
        }
        Request::UpdateStudio {
            studio_id,
            name,
            capacity,
        } => {
            let id = parse_ulid("studio_id", &studio_id)?;
            engine.update_studio(id, name, capacity).await?;
            Ok(Response::ok())
        }
        Request::AddService {
            studio_id,
            name,
            duration_min,
            price_cents,
        } => {
            let studio_id = parse_ulid("studio_id", &studio_id)?;
            let id = Ulid::new();
            engine
                .add_service(id, studio_id, name, duration_min, price_cents)
                .await?;
            Ok(Response::ok_with(json!({ "service_id": id.to_string() })))
        }
        Request::UpdateService {
            studio_id,
            service_id,
            name,
            duration_min,
            price_cents,
        } => {
            let studio_id = parse_ulid("studio_id", &studio_id)?;
            let service_id = parse_ulid("service_id", &service_id)?;
            engine
                .update_service(studio_id, service_id, name, duration_min, price_cents)
                .await?;
            Ok(Response::ok())
        }
        Request::CreateManualBooking {
            studio_id,
            service_id,
            customer_name,
            customer_phone,
            date,
            time,
            notes,
            override_capacity,
        } => {
            admit(
                engine,
                studio_id,
                service_id,
                customer_name,
                customer_phone,
                date,
                time,
                notes,
                BookingOrigin::Owner,
                override_capacity,
            )
            .await
        }
        Request::RequestBooking {
            studio_id,
            service_id,
            customer_name,
            customer_phone,
            date,
            time,
            notes,
        } => {
            admit(
                engine,
                studio_id,
                service_id,
                customer_name,
                customer_phone,
                date,
                time,
                notes,
                BookingOrigin::Customer,
                false,
            )
            .await
        }
        Request::SetBookingStatus { booking_id, status } => {
            let id = parse_ulid("booking_id", &booking_id)?;
            engine.set_booking_status(id, status).await?;
            Ok(Response::ok())
        }
        Request::BlockTime {
            studio_id,
            start_time,
            end_time,
            reason,
            is_all_day,
        } => {
            let studio_id = parse_ulid("studio_id", &studio_id)?;
            let span = Span {
                start: parse_instant("start_time", &start_time)?,
                end: parse_instant("end_time", &end_time)?,
            };
            let id = Ulid::new();
            engine
                .create_block(id, studio_id, span, reason, is_all_day)
                .await?;
            Ok(Response::ok_with(json!({ "block_id": id.to_string() })))
        }
        Request::UnblockTime { block_id, owner_id } => {
            let block_id = parse_ulid("block_id", &block_id)?;
            let owner_id = parse_ulid("owner_id", &owner_id)?;
            engine.delete_block(block_id, owner_id).await?;
            Ok(Response::ok())
        }
        Request::GetBlockedTimes {
            studio_id,
            start_time,
            end_time,
        } => {
            let studio_id = parse_ulid("studio_id", &studio_id)?;
            let start = parse_instant("start_time", &start_time)?;
            let end = parse_instant("end_time", &end_time)?;
            let blocks = engine.blocked_times(studio_id, start, end).await?;
            Ok(Response::ok_data(&blocks))
        }
        Request::GetBookings { studio_id, date } => {
            let studio_id = parse_ulid("studio_id", &studio_id)?;
            let date = parse_date("date", &date)?;
            let bookings = engine.bookings_on(studio_id, date).await?;
            Ok(Response::ok_data(&bookings))
        }
        Request::GetSlotUsage {
            studio_id,
            date,
            time,
            status,
        } => {
            let studio_id = parse_ulid("studio_id", &studio_id)?;
            let slot = SlotKey::new(parse_date("date", &date)?, parse_time("time", &time)?);
            let count = engine.slot_usage(studio_id, slot, status).await;
            Ok(Response::ok_with(json!({ "count": count })))
        }
        Request::ListStudios => Ok(Response::ok_data(&engine.list_studios().await)),
    }
}

#[allow(clippy::too_many_arguments)]
async fn admit(
    engine: &Engine,
    studio_id: String,
    service_id: String,
    customer_name: String,
    customer_phone: String,
    date: String,
    time: String,
    notes: Option<String>,
    origin: BookingOrigin,
    override_capacity: bool,
) -> Result<Response, EngineError> {
    let status = match origin {
        BookingOrigin::Owner => BookingStatus::Confirmed,
        BookingOrigin::Customer => BookingStatus::Pending,
    };
    let req = BookingRequest {
        id: Ulid::new(),
        studio_id: parse_ulid("studio_id", &studio_id)?,
        service_id: parse_ulid("service_id", &service_id)?,
        customer_name,
        customer_phone,
        slot: SlotKey::new(parse_date("date", &date)?, parse_time("time", &time)?),
        notes,
        origin,
        override_capacity,
    };
    match engine.create_booking(req).await? {
        AdmissionDecision::Admitted { booking_id } => Ok(Response::ok_with(json!({
            "booking_id": booking_id.to_string(),
            "booking_status": status,
        }))),
        AdmissionDecision::CapacityFull(warning) => Ok(Response::CapacityFull { warning }),
    }
}
