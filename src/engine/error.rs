use thiserror::Error;

use crate::model::{BookingId, HotelId, Ms, RoomId};

use super::validate::format_instant;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("malformed date: {0:?}")]
    MalformedDate(String),

    #[error("invalid date range: start {} is not before end {}", instant(.start), instant(.end))]
    InvalidRange { start: Ms, end: Ms },

    #[error("start {} is before now ({})", instant(.start), instant(.now))]
    PastDate { start: Ms, now: Ms },

    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("hotel not found: {0}")]
    HotelNotFound(HotelId),

    #[error("booking not found: {0}")]
    BookingNotFound(BookingId),

    #[error("conflict with booking: {0}")]
    Conflict(BookingId),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    /// Transient: lock wait or WAL round trip timed out, or the WAL writer failed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

fn instant(ms: &Ms) -> String {
    format_instant(*ms)
}

impl EngineError {
    /// Only storage failures are worth retrying with identical input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StorageUnavailable(_))
    }

    /// Stable tag for logs, metric labels and the wire.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::MalformedDate(_) => "malformed_date",
            EngineError::InvalidRange { .. } => "invalid_range",
            EngineError::PastDate { .. } => "past_date",
            EngineError::RoomNotFound(_) => "room_not_found",
            EngineError::HotelNotFound(_) => "hotel_not_found",
            EngineError::BookingNotFound(_) => "booking_not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}
