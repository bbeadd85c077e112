//! Application configuration
//!
//! Read from `estima.toml` in the platform config directory, or from an
//! explicit path. Every field has a default, so a missing file or a partial
//! file is fine.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use estima_net::{ServerOptions, DEFAULT_PORT};
use serde::Deserialize;
use thiserror::Error;

const CONFIG_FILE: &str = "estima.toml";
const DATABASE_FILE: &str = "estima.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for `{field}`: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("could not determine the {0} directory")]
    NoProjectDirs(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Seconds a room may sit with nobody connected
    pub room_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            room_ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Room server address, `host:port`
    pub server: String,
    pub reconnect_delays_ms: Vec<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{DEFAULT_PORT}"),
            reconnect_delays_ms: vec![1000, 2000, 5000, 10000, 30000],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file; defaults to the platform data directory
    pub path: Option<PathBuf>,
    /// Cached room state older than this is dropped at startup
    pub retain_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            retain_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path()?, false),
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path, source },
            other => other,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from(CONFIG_FILE),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.client.reconnect_delays_ms.is_empty() {
            return Err(ConfigError::Invalid {
                field: "client.reconnect_delays_ms",
                message: "at least one delay is required".into(),
            });
        }
        if self.server.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "server.sweep_interval_secs",
                message: "must be greater than zero".into(),
            });
        }
        if self.client.server.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "client.server",
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(project_dirs("config")?.config_dir().join(CONFIG_FILE))
    }

    /// Configured SQLite path, or `<data dir>/estima.db`
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.path {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs("data")?.data_dir().join(DATABASE_FILE)),
        }
    }

    /// Server options; `port` overrides the configured one
    pub fn server_options(&self, port: Option<u16>) -> Result<ServerOptions, ConfigError> {
        let bind = format!("{}:{}", self.server.bind, port.unwrap_or(self.server.port));
        let addr: SocketAddr = bind.parse().map_err(|e| ConfigError::Invalid {
            field: "server.bind",
            message: format!("{bind}: {e}"),
        })?;

        let mut options = ServerOptions::new(addr);
        options.room_ttl = Duration::from_secs(self.server.room_ttl_secs);
        options.sweep_interval = Duration::from_secs(self.server.sweep_interval_secs);
        Ok(options)
    }

    pub fn reconnect_delays(&self) -> Vec<Duration> {
        self.client
            .reconnect_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

fn project_dirs(which: &'static str) -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("dev", "estima", "estima").ok_or(ConfigError::NoProjectDirs(which))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.room_ttl_secs, 86400);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.storage.retain_days, 30);
        assert_eq!(config.reconnect_delays().len(), 5);
        assert_eq!(config.reconnect_delays()[0], Duration::from_secs(1));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9000

            [storage]
            path = "/tmp/estima-test.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.client, ClientConfig::default());
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/estima-test.db")
        );
    }

    #[test]
    fn test_server_options() {
        let config = Config::from_toml(
            r#"
            [server]
            bind = "127.0.0.1"
            room_ttl_secs = 30
            sweep_interval_secs = 5
            "#,
        )
        .unwrap();

        let options = config.server_options(Some(0)).unwrap();
        assert_eq!(options.addr, SocketAddr::from(([127, 0, 0, 1], 0)));
        assert_eq!(options.room_ttl, Duration::from_secs(30));
        assert_eq!(options.sweep_interval, Duration::from_secs(5));

        let options = config.server_options(None).unwrap();
        assert_eq!(options.addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_bad_bind_address() {
        let config = Config::from_toml("[server]\nbind = \"not an address\"").unwrap();
        assert!(matches!(
            config.server_options(None),
            Err(ConfigError::Invalid { field: "server.bind", .. })
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_toml("[client]\nreconnect_delays_ms = []"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            Config::from_toml("[server]\nport = \"high\""),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[log]\nlevel = \"debug\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log.level, "debug");

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }
}
