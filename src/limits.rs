//! Hard limits. Every write path checks these before touching the WAL.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_USERS_PER_TENANT: usize = 100_000;
pub const MAX_BOOKINGS_PER_USER: usize = 100_000;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_BIO_LEN: usize = 1024;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_NOTES_LEN: usize = 1024;

/// Bookings before the epoch make no sense; bookings past 2100 are a typo.
pub const MIN_VALID_TIMESTAMP_MS: i64 = 0;
pub const MAX_VALID_TIMESTAMP_MS: i64 = 4_102_444_800_000;

/// Widest `starts_at` range a bookings query may scan (two years).
pub const MAX_BOOKING_RANGE_MS: i64 = 2 * 366 * 86_400_000;
