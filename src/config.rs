//! Server configuration
//!
//! Runtime options for the state-management core: persistence cadence,
//! world dimensions, and battle scheduler tuning. Values come from the
//! environment in production and from struct literals in tests.

/// Configuration for the game server core.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Database URL (e.g., "sqlite://voidfall.db" or "sqlite::memory:")
    pub database_url: String,

    /// Interval between background write-back flushes in milliseconds
    pub persistence_interval_ms: u64,

    /// Enable background write-back timers. When false, every cache
    /// mutation flushes synchronously (test mode).
    pub enable_auto_persistence: bool,

    /// Log cache and lock statistics at info level on each flush
    pub log_stats: bool,

    /// World width in world units
    pub world_width: f64,

    /// World height in world units
    pub world_height: f64,

    /// Battle scheduler tick interval in milliseconds
    pub tick_interval_ms: u64,

    /// Safety cap on weapon firings per battle within a single tick
    pub battle_max_iterations_per_tick: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://voidfall.db".to_string(),
            persistence_interval_ms: 30_000,
            enable_auto_persistence: true,
            log_stats: false,
            world_width: 5000.0,
            world_height: 5000.0,
            tick_interval_ms: 1000,
            battle_max_iterations_per_tick: 100,
        }
    }
}

impl ServerConfig {
    /// Build a configuration from `VOIDFALL_*` environment variables,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_url: env_or("VOIDFALL_DATABASE_URL", defaults.database_url),
            persistence_interval_ms: env_parse(
                "VOIDFALL_PERSISTENCE_INTERVAL_MS",
                defaults.persistence_interval_ms,
            ),
            enable_auto_persistence: env_parse(
                "VOIDFALL_AUTO_PERSISTENCE",
                defaults.enable_auto_persistence,
            ),
            log_stats: env_parse("VOIDFALL_LOG_STATS", defaults.log_stats),
            world_width: env_parse("VOIDFALL_WORLD_WIDTH", defaults.world_width),
            world_height: env_parse("VOIDFALL_WORLD_HEIGHT", defaults.world_height),
            tick_interval_ms: env_parse("VOIDFALL_TICK_INTERVAL_MS", defaults.tick_interval_ms),
            battle_max_iterations_per_tick: env_parse(
                "VOIDFALL_BATTLE_MAX_ITERATIONS",
                defaults.battle_max_iterations_per_tick,
            ),
        }
    }

    /// Minimum toroidal distance between winner and teleported loser.
    pub fn teleport_min_distance(&self) -> f64 {
        self.world_width / 3.0
    }

    /// Configuration for tests: in-memory store, synchronous persistence.
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            enable_auto_persistence: false,
            ..Self::default()
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.persistence_interval_ms, 30_000);
        assert!(config.enable_auto_persistence);
        assert!(!config.log_stats);
        assert_eq!(config.world_width, 5000.0);
        assert_eq!(config.world_height, 5000.0);
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.battle_max_iterations_per_tick, 100);
    }

    #[test]
    fn test_teleport_min_distance_is_a_third_of_width() {
        let config = ServerConfig {
            world_width: 6000.0,
            ..ServerConfig::default()
        };
        assert_eq!(config.teleport_min_distance(), 2000.0);
    }

    #[test]
    fn test_for_tests_disables_write_back() {
        let config = ServerConfig::for_tests();
        assert!(!config.enable_auto_persistence);
        assert_eq!(config.database_url, "sqlite::memory:");
    }
}
