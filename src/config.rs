//! Server Configuration
//!
//! Configuration is read from a TOML file. Every field has a default, so an
//! empty file (or no file at all) yields a working server.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 25566
//! auth_token = "change-me-in-production-please"
//! max_connections = 10
//! timeout_seconds = 30
//!
//! [storage]
//! chunk_start_x = 0
//! chunk_start_z = 0
//! chunk_end_x = 3
//! chunk_end_z = 3
//! min_y = 5
//! max_y = 250
//! encoding = "simple"      # or "optimized"
//! compression = true
//!
//! [cache]
//! size = 1000
//! ttl_seconds = 300
//! ```

use crate::grid::GridBounds;
use crate::storage::Palette;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub protection: ProtectionConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Token every connection must present on its first message
    pub auth_token: String,
    /// Connections beyond this are refused, not queued
    pub max_connections: usize,
    /// Idle timeout per connection
    pub timeout_seconds: u64,
    /// How long a caller waits for its grid operation
    pub operation_timeout_secs: u64,
    /// Longest request line accepted
    pub max_line_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 25566,
            auth_token: "change-me-in-production-please".to_string(),
            max_connections: 10,
            timeout_seconds: 30,
            operation_timeout_secs: 30,
            max_line_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub chunk_start_x: i32,
    pub chunk_start_z: i32,
    pub chunk_end_x: i32,
    pub chunk_end_z: i32,
    pub min_y: i32,
    pub max_y: i32,
    pub encoding: Palette,
    pub compression: bool,
    /// Capacity estimate: cells reserved per key
    pub blocks_per_key: usize,
    /// Capacity estimate: cells reserved per value
    pub blocks_per_value: usize,
    /// Reset stray cells in the region when the index starts empty
    pub clear_on_startup: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_start_x: 0,
            chunk_start_z: 0,
            chunk_end_x: 3,
            chunk_end_z: 3,
            min_y: 5,
            max_y: 250,
            encoding: Palette::Nibble,
            compression: true,
            blocks_per_key: 16,
            blocks_per_value: 32,
            clear_on_startup: true,
        }
    }
}

impl StorageConfig {
    /// The grid volume described by the chunk range and layer range.
    pub fn bounds(&self) -> GridBounds {
        GridBounds::from_chunks(
            self.chunk_start_x,
            self.chunk_start_z,
            self.chunk_end_x,
            self.chunk_end_z,
            self.min_y,
            self.max_y,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub size: usize,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: 1000,
            ttl_seconds: 300,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    pub level: String,
    /// Log every write/read/delete at info level
    pub log_operations: bool,
    /// Log connection open/close at info level
    pub log_connections: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_operations: true,
            log_connections: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    pub prevent_access: bool,
    pub prevent_explosions: bool,
    /// Identities the region guard lets through
    pub bypass: Vec<String>,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            prevent_access: true,
            prevent_explosions: true,
            bypass: Vec::new(),
        }
    }
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in config file {}", path.display()))
    }

    /// Parses and validates configuration text.
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(text).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let s = &self.storage;
        if s.chunk_end_x < s.chunk_start_x || s.chunk_end_z < s.chunk_start_z {
            bail!("storage chunk range is empty");
        }
        if s.max_y < s.min_y {
            bail!("storage.max_y ({}) is below storage.min_y ({})", s.max_y, s.min_y);
        }
        if s.blocks_per_key + s.blocks_per_value == 0 {
            bail!("storage.blocks_per_key + storage.blocks_per_value must be positive");
        }
        if self.server.max_connections == 0 {
            bail!("server.max_connections must be at least 1");
        }
        if self.server.auth_token.is_empty() {
            bail!("server.auth_token must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server.port, 25566);
        assert_eq!(config.server.max_connections, 10);
        assert_eq!(config.storage.encoding, Palette::Nibble);
        assert_eq!(config.storage.bounds().total_cells(), 64 * 64 * 246);
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 4000
            auth_token = "secret"

            [storage]
            encoding = "optimized"
            compression = false
            chunk_end_x = 0
            chunk_end_z = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.auth_token, "secret");
        assert_eq!(config.server.max_connections, 10);
        assert_eq!(config.storage.encoding, Palette::Byte);
        assert!(!config.storage.compression);
        assert_eq!(config.storage.bounds().chunk_count(), 1);
    }

    #[test]
    fn test_validation() {
        assert!(Config::from_toml("[storage]\nmin_y = 10\nmax_y = 5\n").is_err());
        assert!(Config::from_toml("[server]\nmax_connections = 0\n").is_err());
        assert!(Config::from_toml("[server]\nauth_token = \"\"\n").is_err());
        assert!(Config::from_toml("[storage]\nencoding = \"hex\"\n").is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nsize = 5\nttl_seconds = 2").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.cache.size, 5);
        assert_eq!(config.cache.ttl(), Duration::from_secs(2));

        assert!(Config::load(Path::new("/nonexistent/gridkv.toml")).is_err());
    }
}
