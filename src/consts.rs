/// Pattern subscribed to when no `-c` flag is given.
pub const DEFAULT_CHANNEL: &str = "chat:*";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_DB: i64 = 0;

/// Connections kept around after being returned to the pool.
pub const DEFAULT_MAX_IDLE: usize = 5;
/// Connections checked out at once. Zero lifts the limit.
pub const DEFAULT_MAX_ACTIVE: usize = 25;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_BACKOFF_MS: u64 = 100;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 5000;

/// Messages buffered per websocket peer before it starts lagging.
pub const WS_CHANNEL_CAPACITY: usize = 100;
