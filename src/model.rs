use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds on the naive UTC axis. The only time type.
pub type Ms = i64;

pub type HotelId = Ulid;
pub type RoomId = Ulid;
pub type BookingId = Ulid;

/// Two half-open intervals `[a_start, a_end)` and `[b_start, b_end)` overlap iff
/// each one starts before the other ends. Back-to-back intervals do not overlap.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_start < b_end && b_start < a_end
}

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

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotel {
    pub id: HotelId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub hotel_id: HotelId,
    pub name: String,
}

/// A confirmed reservation. Existence in the store means active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub room_id: RoomId,
    pub span: Span,
}

/// Bookings of a single room, sorted by `span.start`.
///
/// Live bookings never overlap, so the list is sorted by `span.end` as well.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: RoomId,
    pub bookings: Vec<Booking>,
    /// Set under the write lock when the room is deleted. A transaction that was
    /// queued on the lock sees this and reports the room as missing.
    pub removed: bool,
}

impl RoomState {
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            bookings: Vec::new(),
            removed: false,
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Bookings whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// Flat event types. This is the WAL record format.
///
/// Deletes carry only the id; replay cascades hotel → rooms → bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HotelCreated {
        id: HotelId,
        name: String,
    },
    HotelDeleted {
        id: HotelId,
    },
    RoomCreated {
        id: RoomId,
        hotel_id: HotelId,
        name: String,
    },
    RoomDeleted {
        id: RoomId,
    },
    BookingCreated {
        id: BookingId,
        room_id: RoomId,
        span: Span,
    },
    BookingCancelled {
        id: BookingId,
        room_id: RoomId,
    },
}
