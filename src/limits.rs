// Hard limits for multi-tenant safety.

// Tenancy
pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

// Cities
pub const MAX_CITIES_PER_TENANT: usize = 1_000;
pub const MAX_SLUG_LEN: usize = 64;
pub const MAX_LABEL_LEN: usize = 256;
pub const MAX_CAPACITY: u32 = 10_000;

// Notices
pub const MAX_MESSAGE_LEN: usize = 2_000;

// Profiles
pub const MIN_NAME_LEN: usize = 2;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_URL_LEN: usize = 2_048;
pub const MAX_PROFILES_PER_TENANT: usize = 100_000;

// Bookings
pub const MAX_GUESTS_PER_PERIOD: u32 = 10;
pub const MAX_BOOKINGS_PER_DAY: usize = 10_000;
/// Widest inclusive date range a single query may scan.
pub const MAX_RANGE_DAYS: i64 = 366;
pub const DEFAULT_WEEKS: u32 = 2;
pub const MAX_WEEKS: u32 = 12;

// Search
pub const MAX_SEARCH_RESULTS: usize = 20;
pub const MAX_QUERY_LEN: usize = 100;

// Protocol
pub const MAX_LINE_LEN: usize = 64 * 1024;
