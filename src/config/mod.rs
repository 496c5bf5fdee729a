//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma separated or `*`
    pub client_origin: String,
    /// Command frames per second accepted from one session
    pub command_rate_limit: u32,
    /// Rules shared by every room
    pub game: GameConfig,
}

/// Per-room game parameters
#[derive(Clone, Debug, PartialEq)]
pub struct GameConfig {
    /// Side length of the square grid
    pub grid_size: usize,
    /// Fraction of non-corner cells that become dormant spawns
    pub extra_spawn_ratio: f64,
    /// Period of troop production
    pub spawn_interval: Duration,
    /// Travel time per unit of distance
    pub move_time_per_cell: Duration,
    /// Fixed layout seed, random per room when unset
    pub seed: Option<u64>,
    /// How long a room with no players stays open
    pub idle_timeout: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            grid_size: 16,
            extra_spawn_ratio: 0.15,
            spawn_interval: Duration::from_millis(1000),
            move_time_per_cell: Duration::from_millis(1000),
            seed: None,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl GameConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let grid_size = parse_or("GRID_SIZE", defaults.grid_size)?;
        if grid_size < 2 {
            return Err(ConfigError::Invalid {
                name: "GRID_SIZE",
                reason: "must be at least 2".to_string(),
            });
        }

        let extra_spawn_ratio = parse_or("EXTRA_SPAWN_RATIO", defaults.extra_spawn_ratio)?;
        if !(0.0..=1.0).contains(&extra_spawn_ratio) {
            return Err(ConfigError::Invalid {
                name: "EXTRA_SPAWN_RATIO",
                reason: "must be between 0 and 1".to_string(),
            });
        }

        let spawn_interval_ms: u64 = parse_or("SPAWN_INTERVAL_MS", 1000)?;
        let move_ms_per_cell: u64 = parse_or("MOVE_MS_PER_CELL", 1000)?;
        let idle_secs: u64 = parse_or("ROOM_IDLE_SECS", defaults.idle_timeout.as_secs())?;
        for (name, value) in [
            ("SPAWN_INTERVAL_MS", spawn_interval_ms),
            ("MOVE_MS_PER_CELL", move_ms_per_cell),
            ("ROOM_IDLE_SECS", idle_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    name,
                    reason: "must be greater than 0".to_string(),
                });
            }
        }

        let seed = match env::var("ROOM_SEED") {
            Ok(raw) => Some(parse_value("ROOM_SEED", &raw)?),
            Err(_) => None,
        };

        Ok(Self {
            grid_size,
            extra_spawn_ratio,
            spawn_interval: Duration::from_millis(spawn_interval_ms),
            move_time_per_cell: Duration::from_millis(move_ms_per_cell),
            seed,
            idle_timeout: Duration::from_secs(idle_secs),
        })
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let command_rate_limit: u32 = parse_or("COMMAND_RATE_LIMIT", 20)?;
        if command_rate_limit == 0 {
            return Err(ConfigError::Invalid {
                name: "COMMAND_RATE_LIMIT",
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            command_rate_limit,

            game: GameConfig::from_env()?,
        })
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        reason: format!("cannot parse {raw:?}"),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
