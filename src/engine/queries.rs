use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub fn hotels(&self) -> Vec<Hotel> {
        self.store.hotels()
    }

    /// Rooms of a hotel in creation order. Unknown hotels have none.
    pub fn rooms_by_hotel(&self, hotel_id: &HotelId) -> Vec<Room> {
        self.store.rooms_by_hotel(hotel_id)
    }

    /// Live bookings of a room, ascending by start.
    pub async fn bookings_by_room(&self, room_id: RoomId) -> Result<Vec<Booking>, EngineError> {
        self.store.list_by_room(room_id).await
    }

    pub fn room_exists(&self, room_id: &RoomId) -> bool {
        self.store.room_exists(room_id)
    }
}
