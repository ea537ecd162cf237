use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

/// 1970-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// Longest stay a single booking may cover.
pub const MAX_STAY_MS: Ms = 366 * DAY_MS;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_HOTELS: usize = 10_000;
pub const MAX_ROOMS_PER_HOTEL: usize = 10_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;
