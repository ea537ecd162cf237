use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::observability::{BOOKINGS_CANCELLED_TOTAL, BOOKINGS_CREATED_TOTAL, BOOKING_CONFLICTS_TOTAL};

use super::validate::validate;
use super::{Engine, EngineError};

impl Engine {
    /// Advisory check: `true` if no live booking of the room overlaps the range.
    ///
    /// Holds no lock once it returns, so the answer can be stale by the time the
    /// caller acts on it. Only `create_booking` decides. An unknown room has no
    /// bookings and reports free.
    pub async fn check_availability(
        &self,
        room_id: RoomId,
        start: &str,
        end: &str,
        now: Ms,
    ) -> Result<bool, EngineError> {
        let span = validate(start, end, now)?;
        let conflict = self.store.find_conflict(room_id, &span).await?;
        Ok(conflict.is_none())
    }

    /// Book `room_id` for `[start, end)` under a fresh id.
    ///
    /// Existence check, conflict scan and insert all run under the room's write
    /// lock, so of any set of overlapping concurrent requests at most one wins.
    /// The booking is durable when this returns `Ok`.
    pub async fn create_booking(
        &self,
        room_id: RoomId,
        start: &str,
        end: &str,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        self.create_booking_with_id(Ulid::new(), room_id, start, end, now)
            .await
    }

    /// `create_booking` under a caller-chosen id, safe to repeat after a
    /// `StorageUnavailable` whose outcome is unknown: if `booking_id` already holds
    /// exactly this room and range, that booking is returned instead of a conflict.
    /// An id already used for anything else is a `Conflict` on that id.
    pub async fn create_booking_with_id(
        &self,
        booking_id: BookingId,
        room_id: RoomId,
        start: &str,
        end: &str,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        let span = validate(start, end, now)?;

        let txn = self
            .store
            .lock_room(room_id)
            .await?
            .ok_or(EngineError::RoomNotFound(room_id))?;
        if let Some(existing) = txn.booking(booking_id) {
            if existing.span != span {
                return Err(EngineError::Conflict(booking_id));
            }
            // Committed by an earlier attempt that timed out waiting for the WAL.
            metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
            debug!("booking {booking_id} on room {room_id} already committed");
            return Ok(existing);
        }
        if self.store.booking_exists(&booking_id) {
            return Err(EngineError::Conflict(booking_id));
        }
        if let Some(existing) = txn.find_conflict(&span) {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict(existing.id));
        }

        let booking = self.store.insert(txn, booking_id, span).await?;
        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        debug!(
            "booked {} on room {room_id} [{}, {})",
            booking.id, span.start, span.end
        );
        Ok(booking)
    }

    /// Hard-delete a booking. Of two concurrent cancels of the same id exactly one
    /// returns `Ok(true)`; the other gets `BookingNotFound`.
    pub async fn cancel_booking(&self, booking_id: BookingId) -> Result<bool, EngineError> {
        if !self.store.delete(booking_id).await? {
            return Err(EngineError::BookingNotFound(booking_id));
        }
        metrics::counter!(BOOKINGS_CANCELLED_TOTAL).increment(1);
        debug!("cancelled booking {booking_id}");
        Ok(true)
    }

    // ── Catalog administration ───────────────────────────────

    pub async fn create_hotel(&self, name: String) -> Result<Hotel, EngineError> {
        self.store.create_hotel(name).await
    }

    pub async fn create_room(&self, hotel_id: HotelId, name: String) -> Result<Room, EngineError> {
        self.store.create_room(hotel_id, name).await
    }

    /// Cascades to the hotel's rooms and their bookings.
    pub async fn delete_hotel(&self, hotel_id: HotelId) -> Result<(), EngineError> {
        if !self.store.delete_hotel(hotel_id).await? {
            return Err(EngineError::HotelNotFound(hotel_id));
        }
        debug!("deleted hotel {hotel_id}");
        Ok(())
    }

    /// Cascades to the room's bookings.
    pub async fn delete_room(&self, room_id: RoomId) -> Result<(), EngineError> {
        if !self.store.delete_room(room_id).await? {
            return Err(EngineError::RoomNotFound(room_id));
        }
        debug!("deleted room {room_id}");
        Ok(())
    }
}
