//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `TUNNELPOOL_CACHE_PATH`, `TUNNELPOOL_LISTEN`
//! 2. **Config file** — path via `--config <path>`, or `tunnelpool.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [pool]
//! cache_path = "/var/lib/tunnelpool/TUNNELS"
//! max_init_open = 8
//! max_retries = 3
//! base_backoff_secs = 10
//! backoff_multiplier = 6
//! init_age = 16
//! default_mtu = 1400
//!
//! [logging]
//! level = "info"
//!
//! [http]
//! listen = "127.0.0.1:8088"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Tuning knobs for the tunnel pool's fleet-management loops.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Path to the live cache file. `.bak` and `.tmp` siblings are derived
    /// from this path (default `/var/lib/tunnelpool/TUNNELS`).
    #[serde(default = "default_cache_path")]
    pub cache_path: String,
    /// Target number of simultaneously active tunnels the Activator opens
    /// toward (default 8).
    #[serde(default = "default_max_init_open")]
    pub max_init_open: u32,
    /// Bounded retry count per open attempt before a record is marked dead
    /// (default 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff between open retries, before jitter (default 10s).
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
    /// Multiplier applied to the backoff after each failed attempt (default 6).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    /// Age assigned to a record on successful open or `add` (default 16).
    #[serde(default = "default_init_age")]
    pub init_age: u8,
    /// MTU passed to the transport when the caller doesn't override it
    /// (default 1400).
    #[serde(default = "default_mtu")]
    pub default_mtu: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Settings for the read-only tunnel-list HTTP surface.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Socket address to bind for `tunnels-active.html` / `tunnels-all.html`
    /// (default `127.0.0.1:8088`).
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_cache_path() -> String {
    "/var/lib/tunnelpool/TUNNELS".to_string()
}
fn default_max_init_open() -> u32 {
    8
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_backoff_secs() -> u64 {
    10
}
fn default_backoff_multiplier() -> u32 {
    6
}
fn default_init_age() -> u8 {
    16
}
fn default_mtu() -> u16 {
    1400
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_listen() -> String {
    "127.0.0.1:8088".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            max_init_open: default_max_init_open(),
            max_retries: default_max_retries(),
            base_backoff_secs: default_base_backoff_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            init_age: default_init_age(),
            default_mtu: default_mtu(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            logging: LoggingConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `tunnelpool.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("tunnelpool.toml").exists() {
            let content =
                std::fs::read_to_string("tunnelpool.toml").expect("Failed to read tunnelpool.toml");
            toml::from_str(&content).expect("Failed to parse tunnelpool.toml")
        } else {
            Config::default()
        };

        if let Ok(cache_path) = std::env::var("TUNNELPOOL_CACHE_PATH") {
            config.pool.cache_path = cache_path;
        }
        if let Ok(listen) = std::env::var("TUNNELPOOL_LISTEN") {
            config.http.listen = listen;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = Config::default();
        assert_eq!(config.pool.max_init_open, 8);
        assert_eq!(config.pool.max_retries, 3);
        assert_eq!(config.pool.init_age, 16);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str("[pool]\nmax_init_open = 4\n").unwrap();
        assert_eq!(config.pool.max_init_open, 4);
        assert_eq!(config.pool.max_retries, 3);
        assert_eq!(config.http.listen, default_listen());
    }
}
