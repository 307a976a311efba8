//! Hard caps. Requests exceeding these are rejected up front so a single
//! client cannot grow the WAL or the in-memory state without bound.

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 2_000;
pub const MAX_ROOM_NAME_LEN: usize = 120;
pub const MAX_IMAGE_REF_LEN: usize = 500;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PASSWORD_LEN: usize = 256;

pub const MAX_ROOMS: usize = 1_000;
pub const MAX_USERS: usize = 100_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

/// Widest window accepted by period/availability queries, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366;
