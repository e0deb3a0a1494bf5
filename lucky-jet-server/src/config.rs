//! Server and round configuration.
//!
//! Defaults reproduce the reference game balance; every value can be
//! overridden from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use crate::game::history::DEFAULT_HISTORY_CAPACITY;

/// Default WebSocket port.
pub const DEFAULT_PORT: u16 = 3001;

/// Round timing and balancing parameters.
#[derive(Debug, Clone)]
pub struct RoundConfig {
    /// Countdown length in seconds.
    pub countdown_secs: u32,
    /// Pause between crash and the next countdown.
    pub post_crash_delay: Duration,
    /// Multiplier tick period.
    pub tick_interval: Duration,
    /// Growth constant `k` in `e^(k·t)`, per second.
    pub growth_rate: f64,
    /// Minimum spacing between two full-state broadcasts.
    pub full_broadcast_min_interval: Duration,
    /// Finished rounds kept in history.
    pub history_capacity: usize,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 10,
            post_crash_delay: Duration::from_secs(3),
            tick_interval: Duration::from_millis(100),
            growth_rate: 0.06,
            full_broadcast_min_interval: Duration::from_millis(50),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl RoundConfig {
    /// Apply `LUCKY_JET_*` environment overrides on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_parse::<u32>("LUCKY_JET_COUNTDOWN_SECS") {
            config.countdown_secs = secs;
        }
        if let Some(ms) = env_parse::<u64>("LUCKY_JET_TICK_MS") {
            config.tick_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(rate) = env_parse::<f64>("LUCKY_JET_GROWTH_RATE") {
            if rate.is_finite() && rate > 0.0 {
                config.growth_rate = rate;
            }
        }
        config
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound queue depth per client; broadcasts to a full queue are dropped.
    pub client_queue_capacity: usize,
    /// Server version string.
    pub version: String,
    /// Round parameters.
    pub round: RoundConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 1000,
            client_queue_capacity: 256,
            version: env!("CARGO_PKG_VERSION").to_string(),
            round: RoundConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    ///
    /// `LUCKY_JET_BIND` takes precedence over `PORT`.
    pub fn from_env() -> Self {
        let mut config = Self {
            round: RoundConfig::from_env(),
            ..Self::default()
        };

        if let Some(port) = env_parse::<u16>("PORT") {
            config.bind_addr.set_port(port);
        }
        if let Some(addr) = env_parse::<SocketAddr>("LUCKY_JET_BIND") {
            config.bind_addr = addr;
        }
        if let Some(max) = env_parse::<usize>("LUCKY_JET_MAX_CONNECTIONS") {
            config.max_connections = max;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
