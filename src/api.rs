//! String-level service facade: the operations an outer layer (GraphQL resolvers, the
//! CLI) calls with raw ids and dates.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};
use ulid::Ulid;

use crate::engine::{format_instant, now_ms, validate, Engine, EngineError};
use crate::model::*;
use crate::observability::{status_label, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS, RETRIES_TOTAL};

pub type Clock = Arc<dyn Fn() -> Ms + Send + Sync>;

/// How often a `StorageUnavailable` failure is retried, with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

// ── Wire records ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRecord {
    pub id: String,
    pub room_id: String,
    pub start_date: String,
    pub end_date: String,
}

impl From<Booking> for BookingRecord {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id.to_string(),
            room_id: b.room_id.to_string(),
            start_date: format_instant(b.span.start),
            end_date: format_instant(b.span.end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotelRecord {
    pub id: String,
    pub name: String,
}

impl From<Hotel> for HotelRecord {
    fn from(h: Hotel) -> Self {
        Self {
            id: h.id.to_string(),
            name: h.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub id: String,
    pub hotel_id: String,
    pub name: String,
}

impl From<Room> for RoomRecord {
    fn from(r: Room) -> Self {
        Self {
            id: r.id.to_string(),
            hotel_id: r.hotel_id.to_string(),
            name: r.name,
        }
    }
}

/// Client-facing error: stable code, human message, and whether an identical retry
/// may succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let message = match &e {
            EngineError::MalformedDate(raw) => format!("Malformed date: {raw:?}"),
            EngineError::InvalidRange { .. } => "Invalid date range".to_string(),
            EngineError::PastDate { .. } => "Start date is in the past".to_string(),
            EngineError::RoomNotFound(_) => "Room not found".to_string(),
            EngineError::HotelNotFound(_) => "Hotel not found".to_string(),
            EngineError::BookingNotFound(_) => "Booking not found".to_string(),
            EngineError::Conflict(_) => "Room already booked for these dates".to_string(),
            EngineError::LimitExceeded(reason) => format!("Limit exceeded: {reason}"),
            EngineError::StorageUnavailable(_) => {
                "Storage temporarily unavailable, please retry".to_string()
            }
        };
        Self {
            code: e.code(),
            message,
            retryable: e.is_retryable(),
        }
    }
}

fn parse_id(raw: &str) -> Option<Ulid> {
    Ulid::from_string(raw.trim()).ok()
}

// ── Service ──────────────────────────────────────────────

#[derive(Clone)]
pub struct BookingService {
    engine: Engine,
    clock: Clock,
    retry: RetryPolicy,
}

impl BookingService {
    pub fn new(engine: Engine, retry: RetryPolicy) -> Self {
        Self {
            engine,
            clock: Arc::new(now_ms),
            retry,
        }
    }

    /// Replace the wall clock used for the past-date rule.
    pub fn with_clock(mut self, clock: impl Fn() -> Ms + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub async fn check_availability(
        &self,
        room_id: &str,
        start: &str,
        end: &str,
    ) -> Result<bool, ApiError> {
        let now = (self.clock)();
        let context = format!("room={room_id} start={start} end={end}");
        let engine = &self.engine;
        match parse_id(room_id) {
            Some(room) => {
                self.run("check_availability", &context, move || {
                    engine.check_availability(room, start, end, now)
                })
                .await
            }
            None => {
                self.run("check_availability", &context, move || async move {
                    validate(start, end, now).and(Err(EngineError::RoomNotFound(Ulid::nil())))
                })
                .await
            }
        }
    }

    /// Retries reuse one booking id, so an attempt whose WAL append outlived
    /// `wal_timeout` but still landed is returned to the caller, not reported as a
    /// conflict with itself.
    pub async fn create_booking(
        &self,
        room_id: &str,
        start: &str,
        end: &str,
    ) -> Result<BookingRecord, ApiError> {
        let now = (self.clock)();
        let context = format!("room={room_id} start={start} end={end}");
        let engine = &self.engine;
        let booking_id = Ulid::new();
        let booking = match parse_id(room_id) {
            Some(room) => {
                self.run("create_booking", &context, move || {
                    engine.create_booking_with_id(booking_id, room, start, end, now)
                })
                .await?
            }
            None => {
                self.run("create_booking", &context, move || async move {
                    validate(start, end, now).and(Err(EngineError::RoomNotFound(Ulid::nil())))
                })
                .await?
            }
        };
        Ok(booking.into())
    }

    pub async fn cancel_booking(&self, booking_id: &str) -> Result<bool, ApiError> {
        let context = format!("booking={booking_id}");
        let engine = &self.engine;
        let id = parse_id(booking_id);
        self.run("cancel_booking", &context, move || async move {
            match id {
                Some(id) => engine.cancel_booking(id).await,
                None => Err(EngineError::BookingNotFound(Ulid::nil())),
            }
        })
        .await
    }

    pub fn hotels(&self) -> Vec<HotelRecord> {
        self.engine.hotels().into_iter().map(Into::into).collect()
    }

    pub fn rooms_by_hotel(&self, hotel_id: &str) -> Vec<RoomRecord> {
        let Some(id) = parse_id(hotel_id) else {
            return Vec::new();
        };
        self.engine.rooms_by_hotel(&id).into_iter().map(Into::into).collect()
    }

    pub async fn bookings_by_room(&self, room_id: &str) -> Result<Vec<BookingRecord>, ApiError> {
        let Some(id) = parse_id(room_id) else {
            return Ok(Vec::new());
        };
        let context = format!("room={room_id}");
        let engine = &self.engine;
        let bookings = self
            .run("bookings_by_room", &context, move || engine.bookings_by_room(id))
            .await?;
        Ok(bookings.into_iter().map(Into::into).collect())
    }

    // ── Catalog administration ───────────────────────────────

    pub async fn add_hotel(&self, name: &str) -> Result<HotelRecord, ApiError> {
        let context = format!("name={name:?}");
        let engine = &self.engine;
        let hotel = self
            .run("add_hotel", &context, move || engine.create_hotel(name.to_string()))
            .await?;
        Ok(hotel.into())
    }

    pub async fn add_room(&self, hotel_id: &str, name: &str) -> Result<RoomRecord, ApiError> {
        let context = format!("hotel={hotel_id} name={name:?}");
        let engine = &self.engine;
        let id = parse_id(hotel_id);
        let room = self
            .run("add_room", &context, move || async move {
                match id {
                    Some(id) => engine.create_room(id, name.to_string()).await,
                    None => Err(EngineError::HotelNotFound(Ulid::nil())),
                }
            })
            .await?;
        Ok(room.into())
    }

    pub async fn remove_hotel(&self, hotel_id: &str) -> Result<bool, ApiError> {
        let context = format!("hotel={hotel_id}");
        let engine = &self.engine;
        let id = parse_id(hotel_id);
        self.run("remove_hotel", &context, move || async move {
            match id {
                Some(id) => engine.delete_hotel(id).await.map(|()| true),
                None => Err(EngineError::HotelNotFound(Ulid::nil())),
            }
        })
        .await
    }

    pub async fn remove_room(&self, room_id: &str) -> Result<bool, ApiError> {
        let context = format!("room={room_id}");
        let engine = &self.engine;
        let id = parse_id(room_id);
        self.run("remove_room", &context, move || async move {
            match id {
                Some(id) => engine.delete_room(id).await.map(|()| true),
                None => Err(EngineError::RoomNotFound(Ulid::nil())),
            }
        })
        .await
    }

    pub async fn compact(&self) -> Result<(), ApiError> {
        let store = self.engine.store();
        self.run("compact", "", move || store.compact_wal()).await
    }

    /// Run `attempt`, retrying `StorageUnavailable` with linear backoff. Logs the final
    /// failure with `context` and records request metrics.
    async fn run<T, F, Fut>(&self, op: &'static str, context: &str, mut attempt: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let started = Instant::now();
        let mut retries = 0;
        let result = loop {
            match attempt().await {
                Err(e) if e.is_retryable() && retries < self.retry.max_retries => {
                    retries += 1;
                    metrics::counter!(RETRIES_TOTAL, "operation" => op).increment(1);
                    warn!("{op} {context}: {e}, retry {retries}/{}", self.retry.max_retries);
                    tokio::time::sleep(self.retry.backoff * retries).await;
                }
                other => break other,
            }
        };

        metrics::counter!(REQUESTS_TOTAL, "operation" => op, "status" => status_label(&result))
            .increment(1);
        metrics::histogram!(REQUEST_DURATION_SECONDS, "operation" => op)
            .record(started.elapsed().as_secs_f64());

        result.map_err(|e| {
            if e.is_retryable() {
                error!("{op} {context} failed after {retries} retries: {e}");
            } else {
                warn!("{op} {context} rejected: {e}");
            }
            ApiError::from(e)
        })
    }
}
