//! # Configuration
//!
//! Settings for the server and client worlds, the transport limits both of them
//! enforce, and logging.
//!
//! ## Sources
//! - a TOML file (`from_file`) or string (`from_toml`)
//! - `NET_SESSION_*` environment variables on top of the defaults (`from_env`)
//! - defaults, optionally adjusted in code (`default_with_overrides`)
//!
//! Missing sections fall back to their defaults, so a file only needs the values it
//! changes.
//!
//! ## Limits worth knowing
//! - `transport.max_message_size` bounds every length header the stream framer
//!   accepts; a larger header closes the connection before anything is buffered
//! - `server.max_connections` caps the connection table; surplus connects are
//!   dropped on arrival
//!
//! ## Example
//! ```rust
//! use net_session::config::NetworkConfig;
//!
//! let config = NetworkConfig::from_toml(
//!     r#"
//!     [server]
//!     address = "0.0.0.0:7777"
//!     max_connections = 64
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.server.max_connections, 64);
//! assert!(config.validate_strict().is_ok());
//! ```

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use tracing::{warn, Level};

/// Default upper bound for a single framed payload (16 KiB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Largest `max_message_size` validation accepts (16 MiB)
pub const MAX_MESSAGE_SIZE_CEILING: usize = 16 * 1024 * 1024;

/// Default number of pre-warmed send buffers
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 16;

/// Default socket read size for stream transports
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

const MAX_BUFFER_POOL_SIZE: usize = 4096;
const MAX_READ_CHUNK_SIZE: usize = 1024 * 1024;
const MAX_CONNECTIONS_WARNING: usize = 100_000;
const MAX_APP_NAME_LENGTH: usize = 64;

const ENV_PREFIX: &str = "NET_SESSION_";

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Read a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ProtocolError::ConfigError(format!("Invalid TOML: {e}")))
    }

    /// Defaults overridden by `NET_SESSION_*` environment variables.
    ///
    /// Recognized: `SERVER_ADDRESS`, `CLIENT_ADDRESS`, `MAX_CONNECTIONS`,
    /// `MAX_MESSAGE_SIZE`, `BUFFER_POOL_SIZE`, `READ_CHUNK_SIZE`, `LOG_LEVEL`,
    /// `JSON_LOGS`. Values that do not parse are ignored with a warning.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        env_override("SERVER_ADDRESS", &mut config.server.address);
        env_override("CLIENT_ADDRESS", &mut config.client.address);
        env_override("MAX_CONNECTIONS", &mut config.server.max_connections);
        env_override("MAX_MESSAGE_SIZE", &mut config.transport.max_message_size);
        env_override("BUFFER_POOL_SIZE", &mut config.transport.buffer_pool_size);
        env_override("READ_CHUNK_SIZE", &mut config.transport.read_chunk_size);
        env_override("LOG_LEVEL", &mut config.logging.log_level);
        env_override("JSON_LOGS", &mut config.logging.json_format);
        Ok(config)
    }

    /// Defaults, adjusted by `mutator`.
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// The default configuration rendered as TOML
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Write this configuration as TOML.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Cannot encode configuration: {e}")))?;
        std::fs::write(path, content).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot write {}: {e}", path.display()))
        })
    }

    /// Every problem found, one message each. Empty means usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = self.server.validate();
        problems.extend(self.client.validate());
        problems.extend(self.transport.validate());
        problems.extend(self.logging.validate());
        problems
    }

    /// Like [`validate`](Self::validate), folded into one `ConfigError`.
    pub fn validate_strict(&self) -> Result<()> {
        let problems = self.validate();
        if problems.is_empty() {
            return Ok(());
        }
        let listed: String = problems.iter().map(|p| format!("\n  - {p}")).collect();
        Err(ProtocolError::ConfigError(format!(
            "Configuration validation failed:{listed}"
        )))
    }
}

fn env_override<T: FromStr>(name: &str, target: &mut T) {
    let key = format!("{ENV_PREFIX}{name}");
    let Ok(raw) = std::env::var(&key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(variable = %key, value = %raw, "Ignoring unparsable environment override"),
    }
}

/// Server world settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, e.g. `"0.0.0.0:7777"`
    pub address: String,

    /// Connections beyond this are dropped as soon as they arrive
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7777".to_string(),
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.address.is_empty() {
            problems.push("Server address cannot be empty".to_string());
        } else if SocketAddr::from_str(&self.address).is_err() {
            problems.push(format!(
                "Invalid server address '{}', expected ip:port",
                self.address
            ));
        }

        match self.max_connections {
            0 => problems.push("Max connections must be greater than 0".to_string()),
            n if n > MAX_CONNECTIONS_WARNING => problems.push(format!(
                "Max connections very high: {n} (above {MAX_CONNECTIONS_WARNING})"
            )),
            _ => {}
        }

        problems
    }
}

/// Client world settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address used by `connect_configured`; may be a host name
    pub address: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7777".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Vec<String> {
        if self.address.is_empty() {
            vec!["Client address cannot be empty".to_string()]
        } else {
            Vec::new()
        }
    }
}

/// Limits shared by both roles
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest payload the stream framer accepts, excluding the 4-byte header
    pub max_message_size: usize,

    /// Send buffers created up front per world
    pub buffer_pool_size: usize,

    /// Bytes requested per socket read by stream transports
    pub read_chunk_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            buffer_pool_size: DEFAULT_BUFFER_POOL_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        // Room for at least the message id
        if self.max_message_size < 2 {
            problems.push("Max message size too small (minimum: 2 bytes)".to_string());
        } else if self.max_message_size > MAX_MESSAGE_SIZE_CEILING {
            problems.push(format!(
                "Max message size too large: {} bytes (maximum: {MAX_MESSAGE_SIZE_CEILING})",
                self.max_message_size
            ));
        }

        if self.buffer_pool_size > MAX_BUFFER_POOL_SIZE {
            problems.push(format!(
                "Buffer pool size too large: {} (maximum: {MAX_BUFFER_POOL_SIZE})",
                self.buffer_pool_size
            ));
        }

        if self.read_chunk_size == 0 {
            problems.push("Read chunk size must be greater than 0".to_string());
        } else if self.read_chunk_size > MAX_READ_CHUNK_SIZE {
            problems.push(format!(
                "Read chunk size too large: {} bytes (maximum: {MAX_READ_CHUNK_SIZE})",
                self.read_chunk_size
            ));
        }

        problems
    }
}

/// Logging settings, consumed by [`init_logging`](crate::utils::logging::init_logging)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Recorded with the startup log line
    pub app_name: String,

    /// Default filter level when `RUST_LOG` is unset
    #[serde(with = "level_name")]
    pub log_level: Level,

    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: "net-session".to_string(),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let length = self.app_name.len();
        if length == 0 {
            vec!["Application name cannot be empty".to_string()]
        } else if length > MAX_APP_NAME_LENGTH {
            vec![format!(
                "Application name too long: {length} characters (maximum: {MAX_APP_NAME_LENGTH})"
            )]
        } else {
            Vec::new()
        }
    }
}

/// `tracing::Level` as a lowercase name ("info", "debug", ...)
mod level_name {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S: Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&level.as_str().to_ascii_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse()
            .map_err(|_| de::Error::custom(format!("unknown log level '{name}'")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = NetworkConfig::from_toml("[transport]\nmax_message_size = 512\n").unwrap();
        assert_eq!(config.transport.max_message_size, 512);
        assert_eq!(config.transport.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);
        assert_eq!(config.server.address, "127.0.0.1:7777");
        assert_eq!(config.logging.log_level, Level::INFO);
    }

    #[test]
    fn test_example_config_parses_back() {
        let text = NetworkConfig::example_config();
        assert!(text.contains("log_level = \"info\""));
        let parsed = NetworkConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.transport.max_message_size, MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_strict_validation_lists_problems() {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.client.address.clear();
            c.logging.app_name.clear();
        });
        let message = config.validate_strict().unwrap_err().to_string();
        assert!(message.contains("\n  - Client address cannot be empty"));
        assert!(message.contains("\n  - Application name cannot be empty"));
    }
}
