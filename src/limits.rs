//! Hard caps on what a single tenant may store or ask for.

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_TEXT_LEN: usize = 2_000;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_SPECIALTIES: usize = 32;

pub const MAX_SERVICE_TYPES_PER_TENANT: usize = 1_000;
pub const MAX_SERVICES_PER_TENANT: usize = 10_000;
pub const MAX_PROFESSIONALS_PER_TENANT: usize = 1_000;
pub const MAX_CLIENTS_PER_TENANT: usize = 1_000_000;
pub const MAX_APPOINTMENTS_PER_DAY: usize = 10_000;

/// Twelve hours; nothing on a one-day grid can take longer.
pub const MAX_SERVICE_DURATION_MINUTES: u32 = 12 * 60;

/// Client search result cap.
pub const MAX_SEARCH_RESULTS: usize = 5;

/// Year 2000 .. year 2200, in Unix ms.
pub const MIN_VALID_TIMESTAMP_MS: i64 = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: i64 = 7_258_118_400_000;
