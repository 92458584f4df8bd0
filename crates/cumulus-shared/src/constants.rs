/// Capacity of a subscriber's outbound event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Debounce window for event delivery in seconds
pub const EVENT_DEBOUNCE_SECS: u64 = 5;

/// How long a subscriber's cached owner record stays valid, in seconds
pub const OWNER_CACHE_TTL_SECS: u64 = 60 * 60;

/// Offline subscribers older than this are expired by the sweeper, in seconds
pub const OFFLINE_MAX_AGE_SECS: u64 = 14 * 24 * 60 * 60;

/// Interval between sweeper passes over the subscriber registry, in seconds
pub const SWEEP_PERIOD_SECS: u64 = 60 * 60;

/// SSE keep-alive interval in seconds
pub const SSE_KEEP_ALIVE_SECS: u64 = 30;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
