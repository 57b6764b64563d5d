//! Application configuration.
//!
//! Configuration comes from a YAML file (all keys optional, unknown keys
//! ignored) with `${VAR}` / `${VAR:-default}` environment expansion
//! applied to the raw content before parsing. [`AppConfig::validate`]
//! rejects impossible settings and fills in defaults; validation failures
//! are fatal at startup.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::connstr::ConnString;
use crate::filter::Filters;
use crate::service::{ConnSetting, ServiceConfig};

/// Default scrape endpoint address.
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:9890";

/// Interval between push shipments.
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(60);

const DEFAULT_POSTGRES_USERNAME: &str = "pgscv";
const DEFAULT_POSTGRES_DBNAME: &str = "postgres";
const DEFAULT_PGBOUNCER_USERNAME: &str = "pgscv";
const DEFAULT_PGBOUNCER_DBNAME: &str = "pgbouncer";

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the YAML content.
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A setting failed validation.
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Whether the self-update routine is requested. Recognized for
    /// compatibility; the agent only logs the setting.
    pub autoupdate: bool,

    /// Suppress collection of potentially sensitive values (query texts).
    pub no_track_mode: bool,

    /// Network address the scrape endpoint listens on.
    pub listen_address: String,

    /// Push target URL. Push mode is enabled when non-empty.
    pub send_metrics_url: String,

    /// API key sent with every push request. Required in push mode.
    pub api_key: String,

    /// Statically configured services.
    pub services: Vec<ConnSetting>,

    /// Connection defaults applied when synthesizing conninfo strings for
    /// discovered services.
    pub defaults: BTreeMap<String, String>,

    /// Named collector filters.
    pub filters: Filters,

    /// Collector factory names to disable, e.g. `system/netdev`.
    pub disable_collectors: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            autoupdate: false,
            no_track_mode: false,
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            send_metrics_url: String::new(),
            api_key: String::new(),
            services: Vec::new(),
            defaults: BTreeMap::new(),
            filters: Filters::new(),
            disable_collectors: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, or return the default
    /// configuration when no path is given.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&expand_env_vars(&content))?;
        tracing::info!(path = %path.display(), "read configuration");
        Ok(config)
    }

    /// Validate settings and fill in defaults.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` for unusable settings.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        // the push gateway refuses unauthenticated payloads, so an API key
        // is mandatory as soon as a push URL is set
        if !self.send_metrics_url.is_empty() && self.api_key.is_empty() {
            return Err(ConfigError::Validation(
                "API key should be specified".to_string(),
            ));
        }

        if self.listen_address.is_empty() {
            self.listen_address = DEFAULT_LISTEN_ADDRESS.to_string();
        }
        self.listen_address.parse::<SocketAddr>().map_err(|_| {
            ConfigError::Validation(format!(
                "invalid listen address: '{}'",
                self.listen_address
            ))
        })?;

        if self.no_track_mode {
            tracing::info!("no-track mode enabled: tracking of sensitive values disabled");
        }

        self.defaults
            .entry("postgres_username".to_string())
            .or_insert_with(|| DEFAULT_POSTGRES_USERNAME.to_string());
        self.defaults
            .entry("postgres_dbname".to_string())
            .or_insert_with(|| DEFAULT_POSTGRES_DBNAME.to_string());
        self.defaults
            .entry("pgbouncer_username".to_string())
            .or_insert_with(|| DEFAULT_PGBOUNCER_USERNAME.to_string());
        self.defaults
            .entry("pgbouncer_dbname".to_string())
            .or_insert_with(|| DEFAULT_PGBOUNCER_DBNAME.to_string());

        for setting in &self.services {
            ConnString::parse(&setting.conninfo)
                .map_err(|e| ConfigError::Validation(format!("invalid conninfo: {e}")))?;
        }

        self.filters.set_default();
        self.filters
            .compile()
            .map_err(|e| ConfigError::Validation(format!("invalid filter: {e}")))?;

        Ok(())
    }

    /// Supervision settings derived from this configuration.
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            no_track_mode: self.no_track_mode,
            conn_defaults: self.defaults.clone(),
            conn_settings: self.services.clone(),
            filters: self.filters.clone(),
            disabled_collectors: self.disable_collectors.clone(),
        }
    }
}

/// Expand environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceType;

    #[test]
    fn test_default_config_is_valid() {
        let mut config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.listen_address, DEFAULT_LISTEN_ADDRESS);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = "\
no_track_mode: true
listen_address: 0.0.0.0:10090
send_metrics_url: https://push.example.com/v1
api_key: abc123
services:
  - service_type: postgres
    conninfo: host=10.0.0.5 port=5432 user=monitor dbname=postgres
defaults:
  postgres_username: monitor
filters:
  netdev/device:
    exclude: \"^(lo|docker)\"
disable_collectors:
  - system/netdev
";
        let mut config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert!(config.no_track_mode);
        assert_eq!(config.listen_address, "0.0.0.0:10090");
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].service_type, ServiceType::Postgres);
        assert_eq!(
            config.defaults.get("postgres_username").map(String::as_str),
            Some("monitor")
        );
        assert_eq!(config.disable_collectors, vec!["system/netdev"]);
        assert!(!config.filters.get("netdev/device").pass("docker0"));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config: Result<AppConfig, _> =
            serde_yaml::from_str("listen_address: 127.0.0.1:9890\nfuture_option: 42\n");
        assert!(config.is_ok());
    }

    #[test]
    fn test_push_url_requires_api_key() {
        let mut config = AppConfig {
            send_metrics_url: "https://push.example.com/v1".to_string(),
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("API key"));

        config.api_key = "abc123".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults_filled() {
        let mut config = AppConfig::default();
        config.validate().unwrap();

        assert_eq!(
            config.defaults.get("postgres_username").map(String::as_str),
            Some("pgscv")
        );
        assert_eq!(
            config.defaults.get("postgres_dbname").map(String::as_str),
            Some("postgres")
        );
        assert_eq!(
            config.defaults.get("pgbouncer_username").map(String::as_str),
            Some("pgscv")
        );
    }

    #[test]
    fn test_invalid_listen_address() {
        let mut config = AppConfig {
            listen_address: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_service_conninfo() {
        let mut config = AppConfig {
            services: vec![ConnSetting::new(ServiceType::Postgres, "nonsense")],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid conninfo"));
    }

    #[test]
    fn test_load_missing_path_yields_default() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.listen_address, DEFAULT_LISTEN_ADDRESS);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgscv.yaml");
        std::fs::write(&path, "listen_address: 127.0.0.1:9891\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.listen_address, "127.0.0.1:9891");

        assert!(AppConfig::load(Some(&dir.path().join("absent.yaml"))).is_err());
    }

    #[test]
    fn test_env_expansion() {
        let expanded = expand_env_vars("api_key: ${PGSCV_TEST_UNSET_VAR:-fallback}");
        assert_eq!(expanded, "api_key: fallback");
    }
}
