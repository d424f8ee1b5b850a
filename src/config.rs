//! Configuration management for Warden.

use axum::http::{HeaderName, StatusCode};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, WardenError};
use crate::jail::{JailConfig, DEFAULT_FORWARDED_HEADER};

/// Prefix for environment overrides, e.g. `WARDEN_JAIL__COOLOFF_SECS=30`.
const ENV_PREFIX: &str = "WARDEN";

/// Main configuration for the Warden service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Jail configuration
    #[serde(default)]
    pub jail: JailSettings,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Interval between sweeps of stale jail state; unset disables sweeping
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_format: LogFormat::default(),
            sweep_interval_secs: None,
        }
    }
}

impl ServerConfig {
    /// Sweep interval, if sweeping is enabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Jail settings as written in configuration files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JailSettings {
    /// Requests admitted per window, inclusive
    #[serde(default = "default_allowed_requests")]
    pub allowed_requests: usize,

    /// Trailing window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Cooloff in seconds
    #[serde(default)]
    pub cooloff_secs: u64,

    /// Identify clients by the forwarded header
    #[serde(default)]
    pub proxied: bool,

    /// Deny without a response body
    #[serde(default)]
    pub silent: bool,

    /// Header trusted in proxied mode
    #[serde(default = "default_forwarded_header")]
    pub forwarded_header: String,

    /// Key direct-mode clients by peer IP instead of `ip:port`
    #[serde(default)]
    pub peer_ip_only: bool,

    /// HTTP status of denials that carry the message
    #[serde(default = "default_deny_status")]
    pub deny_status: u16,
}

impl Default for JailSettings {
    fn default() -> Self {
        Self {
            allowed_requests: default_allowed_requests(),
            window_secs: default_window_secs(),
            cooloff_secs: 0,
            proxied: false,
            silent: false,
            forwarded_header: default_forwarded_header(),
            peer_ip_only: false,
            deny_status: default_deny_status(),
        }
    }
}

fn default_allowed_requests() -> usize {
    5
}

fn default_window_secs() -> u64 {
    5
}

fn default_forwarded_header() -> String {
    DEFAULT_FORWARDED_HEADER.to_string()
}

fn default_deny_status() -> u16 {
    200
}

impl JailSettings {
    /// Build the runtime jail configuration.
    pub fn to_jail_config(&self) -> Result<JailConfig> {
        if self.window_secs == 0 {
            return Err(WardenError::Config("jail.window_secs must be positive".into()));
        }
        if self.allowed_requests == 0 {
            return Err(WardenError::Config(
                "jail.allowed_requests must be positive".into(),
            ));
        }

        let forwarded_header = HeaderName::from_bytes(self.forwarded_header.as_bytes())
            .map_err(|e| {
                WardenError::Config(format!(
                    "Invalid forwarded header {:?}: {}",
                    self.forwarded_header, e
                ))
            })?;

        let deny_status = StatusCode::from_u16(self.deny_status).map_err(|e| {
            WardenError::Config(format!("Invalid deny status {}: {}", self.deny_status, e))
        })?;

        Ok(JailConfig {
            allowed_requests: self.allowed_requests,
            window: Duration::from_secs(self.window_secs),
            cooloff: Duration::from_secs(self.cooloff_secs),
            proxied: self.proxied,
            silent: self.silent,
            forwarded_header,
            peer_ip_only: self.peer_ip_only,
            deny_status,
        })
    }
}

impl WardenConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WardenConfig = serde_yaml::from_str(yaml)
            .map_err(|e| WardenError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file overlaid with
    /// `WARDEN_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }

        let config: WardenConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the settings can build a jail.
    pub fn validate(&self) -> Result<()> {
        self.jail.to_jail_config().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WardenConfig::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.server.log_format, LogFormat::Text);
        assert_eq!(config.server.sweep_interval(), None);

        let jail = config.jail.to_jail_config().unwrap();
        assert_eq!(jail.allowed_requests, 5);
        assert_eq!(jail.window, Duration::from_secs(5));
        assert_eq!(jail.cooloff, Duration::ZERO);
        assert!(!jail.proxied);
        assert!(!jail.silent);
        assert_eq!(jail.forwarded_header.as_str(), "x-forwarded-for");
        assert!(!jail.peer_ip_only);
        assert_eq!(jail.deny_status, StatusCode::OK);
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
server:
  listen_addr: 0.0.0.0:9000
  log_format: json
  sweep_interval_secs: 30
jail:
  allowed_requests: 10
  window_secs: 60
  cooloff_secs: 120
  proxied: true
  silent: true
  forwarded_header: X-Real-IP
  peer_ip_only: true
  deny_status: 429
"#;
        let config = WardenConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.server.log_format, LogFormat::Json);
        assert_eq!(config.server.sweep_interval(), Some(Duration::from_secs(30)));

        let jail = config.jail.to_jail_config().unwrap();
        assert_eq!(jail.allowed_requests, 10);
        assert_eq!(jail.window, Duration::from_secs(60));
        assert_eq!(jail.cooloff, Duration::from_secs(120));
        assert!(jail.proxied);
        assert!(jail.silent);
        assert_eq!(jail.forwarded_header.as_str(), "x-real-ip");
        assert!(jail.peer_ip_only);
        assert_eq!(jail.deny_status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
jail:
  cooloff_secs: 5
"#;
        let config = WardenConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.jail.allowed_requests, 5);
        assert_eq!(config.jail.window_secs, 5);
        assert_eq!(config.jail.cooloff_secs, 5);
    }

    #[test]
    fn test_zero_window_rejected() {
        let yaml = r#"
jail:
  window_secs: 0
"#;
        let err = WardenConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, WardenError::Config(_)));
    }

    #[test]
    fn test_invalid_deny_status_rejected() {
        let settings = JailSettings {
            deny_status: 42,
            ..JailSettings::default()
        };
        assert!(matches!(settings.to_jail_config(), Err(WardenError::Config(_))));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let settings = JailSettings {
            forwarded_header: "not a header".to_string(),
            ..JailSettings::default()
        };
        assert!(settings.to_jail_config().is_err());
    }

    #[test]
    fn test_load_file_with_env_override() {
        let dir = std::env::temp_dir().join(format!("warden-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("warden.yaml");
        std::fs::write(
            &path,
            "jail:\n  allowed_requests: 3\n  window_secs: 10\n",
        )
        .unwrap();

        std::env::set_var("WARDEN_JAIL__ALLOWED_REQUESTS", "7");
        let config = WardenConfig::load(Some(&path));
        std::env::remove_var("WARDEN_JAIL__ALLOWED_REQUESTS");
        std::fs::remove_dir_all(&dir).unwrap();

        let config = config.unwrap();
        assert_eq!(config.jail.allowed_requests, 7);
        assert_eq!(config.jail.window_secs, 10);
    }
}
