use crate::model::Ms;

pub const LAB_OPEN_HOUR: u32 = 7;
pub const LAB_CLOSE_HOUR: u32 = 20;

pub const MIN_RESERVATION_MINUTES: i64 = 30;
pub const MAX_RESERVATION_MINUTES: i64 = 240;
/// Longest gap an availability query can ask for: one whole day.
pub const MAX_GAP_MINUTES: i64 = 24 * 60;

/// America/Bogota, which keeps no daylight saving time.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = -300;

pub const MIN_PURPOSE_LEN: usize = 3;
pub const MAX_PURPOSE_LEN: usize = 2_000;
pub const MIN_NAME_LEN: usize = 3;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_TEXT_LEN: usize = 4_000;

pub const MAX_LINES_PER_REQUEST: usize = 64;
pub const MAX_LINE_QUANTITY: u32 = 10_000;
pub const MAX_STOCK: i64 = 1_000_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
