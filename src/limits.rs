//! Hard caps on inputs and state size.

use std::time::Duration;

pub const MAX_AREAS: usize = 1024;
pub const MAX_REQUESTERS: usize = 65_536;
pub const MAX_BOOKINGS_PER_AREA: usize = 100_000;

pub const MAX_NAME_LEN: usize = 120;
/// Motive, description and notes fields.
pub const MAX_TEXT_LEN: usize = 1000;

/// Ceiling on an area's advance-booking horizon (5 years).
pub const MAX_ADVANCE_DAYS: i64 = 1825;

pub const MAX_SITES: usize = 256;
pub const MAX_SITE_NAME_LEN: usize = 128;

/// Longest a caller waits for an area's book lock before the operation
/// fails with `Contended`.
pub const WRITE_LOCK_WAIT: Duration = Duration::from_secs(2);
