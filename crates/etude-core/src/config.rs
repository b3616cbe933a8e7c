use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{EtudeError, EtudeResult};

/// Server configuration.
///
/// Every field has a default; `from_env` overlays `ETUDE_*` environment
/// variables (and a `.env` file when present) on top of those defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind (default: 127.0.0.1)
    pub host: String,

    /// Port to bind (default: 9990)
    pub port: u16,

    /// Listen backlog depth (default: 5)
    pub backlog: i32,

    /// Number of worker threads (default: 8)
    pub workers: usize,

    /// Maximum number of connections waiting in the dispatcher (default: 10000)
    pub queue_capacity: usize,

    /// Hard ceiling on simultaneously open connections (default: 10000)
    pub max_connections: usize,

    /// Readiness events fetched per wait call (default: 1024)
    pub max_events: usize,

    /// Fixed per-connection read buffer size in bytes (default: 2048)
    pub read_buffer_size: usize,

    /// Fixed per-connection write buffer size in bytes (default: 1024)
    pub write_buffer_size: usize,

    /// Directory static documents are served from (default: www)
    pub doc_root: PathBuf,

    /// Document served when the target is exactly `/` (default: index.html)
    pub default_document: String,

    /// Number of pre-established resources in the pool (default: 8)
    pub pool_size: usize,

    /// Files up to this size are copied into the write buffer instead of
    /// being memory-mapped (default: 512)
    pub inline_file_limit: usize,

    /// Pin each worker to a CPU core (default: false)
    pub pin_workers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9990,
            backlog: 5,
            workers: 8,
            queue_capacity: 10_000,
            max_connections: 10_000,
            max_events: 1024,
            read_buffer_size: 2048,
            write_buffer_size: 1024,
            doc_root: PathBuf::from("www"),
            default_document: "index.html".to_string(),
            pool_size: 8,
            inline_file_limit: 512,
            pin_workers: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (with .env support).
    pub fn from_env() -> EtudeResult<Self> {
        // Load .env file if present (ignore errors if missing)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = Self {
            host: std::env::var("ETUDE_HOST").unwrap_or(defaults.host),
            port: env_or("ETUDE_PORT", defaults.port),
            backlog: env_or("ETUDE_BACKLOG", defaults.backlog),
            workers: env_or("ETUDE_WORKERS", defaults.workers),
            queue_capacity: env_or("ETUDE_QUEUE_CAPACITY", defaults.queue_capacity),
            max_connections: env_or("ETUDE_MAX_CONNECTIONS", defaults.max_connections),
            max_events: env_or("ETUDE_MAX_EVENTS", defaults.max_events),
            read_buffer_size: env_or("ETUDE_READ_BUFFER_SIZE", defaults.read_buffer_size),
            write_buffer_size: env_or("ETUDE_WRITE_BUFFER_SIZE", defaults.write_buffer_size),
            doc_root: std::env::var("ETUDE_DOC_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.doc_root),
            default_document: std::env::var("ETUDE_DEFAULT_DOCUMENT")
                .unwrap_or(defaults.default_document),
            pool_size: env_or("ETUDE_POOL_SIZE", defaults.pool_size),
            inline_file_limit: env_or("ETUDE_INLINE_FILE_LIMIT", defaults.inline_file_limit),
            pin_workers: matches!(
                std::env::var("ETUDE_PIN_WORKERS")
                    .unwrap_or_default()
                    .to_lowercase()
                    .as_str(),
                "true" | "1" | "yes"
            ),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> EtudeResult<()> {
        let nonzero = [
            ("workers", self.workers),
            ("queue_capacity", self.queue_capacity),
            ("max_connections", self.max_connections),
            ("max_events", self.max_events),
            ("read_buffer_size", self.read_buffer_size),
            ("write_buffer_size", self.write_buffer_size),
            ("pool_size", self.pool_size),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(EtudeError::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.backlog <= 0 {
            return Err(EtudeError::Config("backlog must be greater than zero".into()));
        }
        // The slot index occupies the low half of a registration token.
        if self.max_connections > u32::MAX as usize {
            return Err(EtudeError::Config("max_connections does not fit a token".into()));
        }
        // Status line + headers of the largest built-in response must fit.
        if self.write_buffer_size < 256 {
            return Err(EtudeError::Config("write_buffer_size must be at least 256".into()));
        }
        if self.default_document.is_empty() || self.default_document.contains('/') {
            return Err(EtudeError::Config(
                "default_document must be a bare file name".into(),
            ));
        }
        Ok(())
    }

    /// The socket address to bind.
    pub fn bind_addr(&self) -> EtudeResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| EtudeError::Config(format!("invalid bind address: {}", e)))
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers, 8);
        assert_eq!(config.read_buffer_size, 2048);
        assert_eq!(config.bind_addr().unwrap().port(), 9990);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = ServerConfig {
            workers: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(EtudeError::Config(_))));

        let config = ServerConfig {
            default_document: "a/b.html".into(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_host_is_a_config_error() {
        let config = ServerConfig {
            host: "not an address".into(),
            ..ServerConfig::default()
        };
        assert!(matches!(config.bind_addr(), Err(EtudeError::Config(_))));
    }
}
