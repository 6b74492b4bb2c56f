//! Centralized server configuration.
//!
//! Loaded via the `config` crate from, in increasing precedence:
//!
//! 1. `waypoint.toml` in the working directory, or the file named by
//!    `WAYPOINT_CONFIG` (required when set)
//! 2. `WAYPOINT__*` environment variables, with `__` separating nested keys
//!    (e.g. `WAYPOINT__STORAGE_CONFIG__URI`)

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use waypoint_workflow::{PersistPolicy, StorageConfig, StorageKind};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "WAYPOINT_CONFIG";

/// Configuration file looked for when `WAYPOINT_CONFIG` is unset.
const DEFAULT_CONFIG_FILE: &str = "waypoint.toml";

/// Verbosity of the default log filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Filter directive used when `RUST_LOG` is unset.
    #[must_use]
    pub fn directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info,tower_http=debug",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WaypointConfig {
    /// Which storage backend to persist through.
    #[serde(default)]
    pub storage_type: StorageKind,

    /// Connection settings for networked backends.
    #[serde(default)]
    pub storage_config: StorageConfig,

    /// Where to post transition webhooks. Unset disables them.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Webhook request timeout in milliseconds.
    #[serde(default = "default_webhook_timeout_ms")]
    pub webhook_timeout_ms: u64,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Locale for user-visible messages when a request does not ask for one.
    #[serde(default = "default_locale")]
    pub default_locale: String,

    /// Path of the workflow definition JSON.
    #[serde(default = "default_definition_path")]
    pub definition_path: PathBuf,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Attempts to persist a state change before reverting it.
    #[serde(default = "default_persist_attempts")]
    pub persist_attempts: u32,

    /// Pause before the second persist attempt, in milliseconds. Grows
    /// linearly with each further attempt.
    #[serde(default = "default_persist_backoff_ms")]
    pub persist_backoff_ms: u64,
}

fn default_webhook_timeout_ms() -> u64 {
    5_000
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_definition_path() -> PathBuf {
    PathBuf::from("workflow.json")
}

fn default_bind_address() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_persist_attempts() -> u32 {
    3
}

fn default_persist_backoff_ms() -> u64 {
    50
}

impl WaypointConfig {
    /// Loads configuration from the default file locations and the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required file is missing or a value is invalid.
    pub fn load() -> Result<Self, config::ConfigError> {
        let explicit = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::from_sources(explicit.as_deref(), None)
    }

    /// Loads configuration from `file` (or `waypoint.toml` if present) and
    /// the environment. `env` replaces the process environment when given.
    ///
    /// # Errors
    ///
    /// Returns an error if `file` is missing or a value is invalid.
    pub fn from_sources(
        file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, config::ConfigError> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix("WAYPOINT")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }

    /// Persistence retry policy for the workflow manager.
    #[must_use]
    pub fn persist_policy(&self) -> PersistPolicy {
        PersistPolicy {
            attempts: self.persist_attempts,
            backoff: Duration::from_millis(self.persist_backoff_ms),
        }
    }

    #[must_use]
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    #[test]
    fn defaults_apply_without_sources() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(WaypointConfig::from_sources(Some(&missing), env(&[])).is_err());

        let config = WaypointConfig::from_sources(None, env(&[])).unwrap();
        assert_eq!(config.storage_type, StorageKind::Memory);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.default_locale, "en");
        assert_eq!(config.definition_path, PathBuf::from("workflow.json"));
        assert_eq!(config.bind_address, "127.0.0.1:3000");
        assert_eq!(config.persist_policy(), PersistPolicy::default());
        assert!(config.webhook_url.is_none());
    }

    #[test]
    fn reads_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
storage_type = "nats"
webhook_url = "http://hooks.local/waypoint"
log_level = "debug"
default_locale = "es"

[storage_config]
uri = "nats://localhost:4222"
db_name = "orders"
"#
        )
        .unwrap();

        let config = WaypointConfig::from_sources(Some(file.path()), env(&[])).unwrap();
        assert_eq!(config.storage_type, StorageKind::Nats);
        assert_eq!(config.storage_config.uri, "nats://localhost:4222");
        assert_eq!(config.storage_config.namespace(), "orders");
        assert_eq!(config.webhook_url.as_deref(), Some("http://hooks.local/waypoint"));
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.default_locale, "es");
    }

    #[test]
    fn environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "bind_address = \"0.0.0.0:8080\"\npersist_attempts = 5").unwrap();

        let config = WaypointConfig::from_sources(
            Some(file.path()),
            env(&[
                ("WAYPOINT__BIND_ADDRESS", "127.0.0.1:9000"),
                ("WAYPOINT__STORAGE_TYPE", "postgres"),
                ("WAYPOINT__STORAGE_CONFIG__URI", "postgres://localhost/waypoint"),
                ("WAYPOINT__PERSIST_BACKOFF_MS", "10"),
            ]),
        )
        .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.persist_attempts, 5);
        assert_eq!(config.storage_type, StorageKind::Postgres);
        assert_eq!(config.storage_config.uri, "postgres://localhost/waypoint");
        assert_eq!(config.persist_policy().backoff, Duration::from_millis(10));
    }

    #[test]
    fn log_level_directives() {
        assert_eq!(LogLevel::Warn.directive(), "warn");
        assert!(LogLevel::Info.directive().starts_with("info"));
    }
}
