use std::{net::SocketAddr, time::Duration};

use clap::Parser;

use crate::consts::{
    DEFAULT_BACKOFF_MS, DEFAULT_CHANNEL, DEFAULT_DB, DEFAULT_HOST, DEFAULT_MAX_ACTIVE,
    DEFAULT_MAX_BACKOFF_MS, DEFAULT_MAX_IDLE, DEFAULT_MAX_RETRIES, DEFAULT_PORT,
};
use crate::error::RelayError;

/// Subscribe to channel patterns on a redis broker and log every message.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Channels to connect to.
    #[arg(short = 'c', long = "channel", env = "PSUB_CHANNEL", value_delimiter = ',', default_value = DEFAULT_CHANNEL)]
    pub channels: Vec<String>,

    /// Host of the redis server.
    #[arg(short = 'H', long, env = "PSUB_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(short, long, env = "PSUB_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Database selected when dialing.
    #[arg(short, long, env = "PSUB_DB", default_value_t = DEFAULT_DB)]
    pub db: i64,

    #[arg(long, default_value_t = DEFAULT_MAX_IDLE)]
    pub max_idle: usize,

    /// Zero means unbounded.
    #[arg(long, default_value_t = DEFAULT_MAX_ACTIVE)]
    pub max_active: usize,

    /// Reconnect attempts before giving up. Zero retries forever.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    #[arg(long, default_value_t = DEFAULT_BACKOFF_MS)]
    pub backoff_ms: u64,

    #[arg(long, default_value_t = DEFAULT_MAX_BACKOFF_MS)]
    pub max_backoff_ms: u64,

    /// Seconds between stats log lines, 0 disables them.
    #[arg(long, default_value_t = 0)]
    pub stats_interval: u64,

    /// Serve received messages as JSON to websocket clients on this address.
    #[arg(long, env = "PSUB_WS_ADDR")]
    pub ws_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_idle: usize,
    pub max_active: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_IDLE,
            max_active: DEFAULT_MAX_ACTIVE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based): the initial
    /// backoff doubled per attempt, capped at `max_backoff`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1 << shift)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_retries != 0 && attempt > self.max_retries
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

/// Config
/// Everything the relay needs, built once at startup and passed down.
#[derive(Debug, Clone)]
pub struct Config {
    pub channels: Vec<String>,
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub pool: PoolConfig,
    pub reconnect: ReconnectPolicy,
    pub stats_interval: Option<Duration>,
    pub ws_addr: Option<SocketAddr>,
}

impl Config {
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

impl TryFrom<Args> for Config {
    type Error = RelayError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let channels: Vec<String> = args
            .channels
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        if channels.is_empty() {
            return Err(RelayError::InvalidConfig("no channel pattern given"));
        }

        if args.max_active != 0 && args.max_idle > args.max_active {
            return Err(RelayError::InvalidConfig(
                "max-idle cannot exceed max-active",
            ));
        }

        // a zero delay would spin on a dead connection
        if args.backoff_ms == 0 {
            return Err(RelayError::InvalidConfig("backoff-ms must be non-zero"));
        }

        if args.backoff_ms > args.max_backoff_ms {
            return Err(RelayError::InvalidConfig(
                "backoff-ms cannot exceed max-backoff-ms",
            ));
        }

        Ok(Self {
            channels,
            host: args.host,
            port: args.port,
            db: args.db,
            pool: PoolConfig {
                max_idle: args.max_idle,
                max_active: args.max_active,
            },
            reconnect: ReconnectPolicy {
                max_retries: args.max_retries,
                initial_backoff: Duration::from_millis(args.backoff_ms),
                max_backoff: Duration::from_millis(args.max_backoff_ms),
            },
            stats_interval: match args.stats_interval {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            ws_addr: args.ws_addr,
        })
    }
}
