use crate::model::{Ms, MS_PER_HOUR};

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Longest single booking.
pub const MAX_BOOKING_DURATION_MS: Ms = 7 * 24 * MS_PER_HOUR;

pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_COMMENT_LEN: usize = 4_000;
pub const MAX_BOOKINGS_PER_PROVIDER: usize = 100_000;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 128;
