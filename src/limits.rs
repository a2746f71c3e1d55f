use crate::model::Ms;

/// Shortest reservation a customer may book.
pub const MIN_RESERVATION_MS: Ms = 60 * 60_000;

/// Price a building falls back to when its provider leaves.
pub const DEFAULT_BUILDING_PRICE: u64 = 400;

pub const MAX_BUILDINGS: usize = 10_000;
pub const MAX_FLOORS_PER_BUILDING: usize = 200;
pub const MAX_SLOTS_PER_FLOOR: usize = 2_000;
pub const MAX_RESERVATIONS_PER_SLOT: usize = 1_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TEXT_LEN: usize = 4_096;

/// 2000-01-01T00:00:00Z, anything earlier is treated as garbage input.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
/// One year.
pub const MAX_RESERVATION_MS: Ms = 366 * 24 * 60 * 60_000;

/// Largest WAL entry payload. Fits a building at the floor and slot caps.
pub const MAX_WAL_ENTRY_BYTES: usize = 16 * 1024 * 1024;
