//! Gateway configuration.
//!
//! Settings come from a TOML file, with command-line overrides on top.
//! Every field has a default, so an empty or missing file is valid.
//!
//! # Example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 5001
//! http_port = 5002
//! ws_path = "/ws/gateway"
//!
//! [gateway]
//! heartbeat_check_interval = 30
//! heartbeat_timeout = 60
//! request_timeout = 5
//! default_vehicle_id = "vehicle-001"
//!
//! [log]
//! level = "info"
//! format = "json"
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use crate::error::{Error, Result};
use crate::identifiers::DeviceId;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for every `[gateway]` duration, in seconds (one day).
pub const MAX_DURATION_SECS: u64 = 86_400;

// ============================================================================
// Args
// ============================================================================

/// Command-line arguments.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "vehicle-gateway")]
#[command(about = "Real-time gateway between vehicles and front-end clients")]
#[command(version)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, short, default_value = "config.toml", env = "GATEWAY_CONFIG")]
    pub config: PathBuf,
    /// Listen address, overriding `server.host`.
    #[arg(long, env = "GATEWAY_HOST")]
    pub host: Option<IpAddr>,
    /// WebSocket port, overriding `server.port`.
    #[arg(long, env = "GATEWAY_PORT")]
    pub port: Option<u16>,
    /// HTTP API port, overriding `server.http_port`.
    #[arg(long, env = "GATEWAY_HTTP_PORT")]
    pub http_port: Option<u16>,
    /// Log level or filter directive, overriding `log.level`.
    #[arg(long, env = "GATEWAY_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Args {
    /// Applies the command-line overrides to `config`.
    pub fn apply(&self, config: &mut GatewayConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(http_port) = self.http_port {
            config.server.http_port = http_port;
        }
        if let Some(level) = &self.log_level {
            config.log.level.clone_from(level);
        }
    }
}

// ============================================================================
// GatewayConfig
// ============================================================================

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Listener settings.
    pub server: ServerSection,
    /// Liveness and proxied request settings.
    pub gateway: GatewaySection,
    /// Logging settings.
    pub log: LogSection,
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// Listen address for both servers.
    pub host: IpAddr,
    /// WebSocket gateway port.
    pub port: u16,
    /// HTTP API port.
    pub http_port: u16,
    /// WebSocket upgrade path.
    pub ws_path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 5001,
            http_port: 5002,
            ws_path: "/ws/gateway".to_string(),
        }
    }
}

/// `[gateway]` section. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewaySection {
    /// Liveness sweep period.
    pub heartbeat_check_interval: u64,
    /// Silence after which a vehicle is evicted.
    pub heartbeat_timeout: u64,
    /// Wait for a proxied vehicle response.
    pub request_timeout: u64,
    /// Vehicle used by the snapshot endpoint when none is given.
    pub default_vehicle_id: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            heartbeat_check_interval: 30,
            heartbeat_timeout: 60,
            request_timeout: 5,
            default_vehicle_id: "vehicle-001".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable text.
    Text,
}

/// `[log]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    /// Level or `EnvFilter` directive, used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

// ============================================================================
// GatewayConfig - Loading
// ============================================================================

impl GatewayConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text is not a valid configuration.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config(e.to_string()))
    }

    /// Reads a configuration file.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be read
    /// - [`Error::Config`] if its contents are invalid
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))
    }

    /// Reads a configuration file that may not exist.
    ///
    /// Returns `Ok(None)` for a missing file.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load), except for a missing file.
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        match Self::load(path) {
            Ok(config) => Ok(Some(config)),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Checks that the settings are usable together.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let gateway = &self.gateway;

        for (name, secs) in [
            ("heartbeat_check_interval", gateway.heartbeat_check_interval),
            ("heartbeat_timeout", gateway.heartbeat_timeout),
            ("request_timeout", gateway.request_timeout),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(Error::config(format!(
                    "{name} must be at most {MAX_DURATION_SECS} seconds"
                )));
            }
        }

        if gateway.heartbeat_check_interval == 0 {
            return Err(Error::config("heartbeat_check_interval must be greater than 0"));
        }
        if gateway.heartbeat_timeout == 0 {
            return Err(Error::config("heartbeat_timeout must be greater than 0"));
        }
        if gateway.heartbeat_timeout <= gateway.heartbeat_check_interval {
            return Err(Error::config(
                "heartbeat_timeout must be greater than heartbeat_check_interval",
            ));
        }
        if gateway.request_timeout == 0 {
            return Err(Error::config("request_timeout must be greater than 0"));
        }
        if DeviceId::parse(&gateway.default_vehicle_id).is_none() {
            return Err(Error::config("default_vehicle_id must not be empty"));
        }

        let server = &self.server;

        if server.port == server.http_port && server.port != 0 {
            return Err(Error::config("port and http_port must differ"));
        }
        if !server.ws_path.starts_with('/') {
            return Err(Error::config("ws_path must start with '/'"));
        }
        if self.log.level.trim().is_empty() {
            return Err(Error::config("log level must not be empty"));
        }

        Ok(())
    }
}

// ============================================================================
// GatewayConfig - Accessors
// ============================================================================

impl GatewayConfig {
    /// Returns the WebSocket gateway address.
    #[inline]
    #[must_use]
    pub fn ws_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    /// Returns the HTTP API address.
    #[inline]
    #[must_use]
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.http_port)
    }

    /// Returns the liveness sweep period.
    #[inline]
    #[must_use]
    pub fn heartbeat_check_interval(&self) -> Duration {
        Duration::from_secs(self.gateway.heartbeat_check_interval)
    }

    /// Returns the liveness timeout.
    #[inline]
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.heartbeat_timeout)
    }

    /// Returns the proxied request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.request_timeout)
    }

    /// Returns the snapshot endpoint's default vehicle.
    #[inline]
    #[must_use]
    pub fn default_vehicle_id(&self) -> DeviceId {
        DeviceId::new(self.gateway.default_vehicle_id.trim())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn assert_invalid(config: &GatewayConfig, needle: &str) {
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains(needle), "{err}");
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.ws_addr(), "127.0.0.1:5001".parse().expect("addr"));
        assert_eq!(config.http_addr(), "127.0.0.1:5002".parse().expect("addr"));
        assert_eq!(config.server.ws_path, "/ws/gateway");
        assert_eq!(config.heartbeat_check_interval(), Duration::from_secs(30));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(60));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.default_vehicle_id(), DeviceId::new("vehicle-001"));
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(
            GatewayConfig::from_toml("").expect("parse"),
            GatewayConfig::default()
        );
    }

    #[test]
    fn test_partial_toml() {
        let config = GatewayConfig::from_toml(
            r#"
            [server]
            port = 6001

            [log]
            format = "text"
            "#,
        )
        .expect("parse");

        assert_eq!(config.server.port, 6001);
        assert_eq!(config.server.http_port, 5002);
        assert_eq!(config.log.format, LogFormat::Text);
        assert_eq!(config.gateway, GatewaySection::default());
    }

    #[test]
    fn test_rejects_unknown_fields_and_formats() {
        assert!(GatewayConfig::from_toml("[server]\nprot = 1").is_err());
        assert!(GatewayConfig::from_toml("[log]\nformat = \"xml\"").is_err());
    }

    #[test]
    fn test_validate_intervals() {
        let mut config = GatewayConfig::default();
        config.gateway.heartbeat_check_interval = 0;
        assert_invalid(&config, "heartbeat_check_interval");

        let mut config = GatewayConfig::default();
        config.gateway.heartbeat_timeout = 30;
        assert_invalid(&config, "greater than heartbeat_check_interval");

        let mut config = GatewayConfig::default();
        config.gateway.request_timeout = 0;
        assert_invalid(&config, "request_timeout");

        let mut config = GatewayConfig::default();
        config.gateway.heartbeat_check_interval = u64::MAX;
        config.gateway.heartbeat_timeout = u64::MAX;
        assert_invalid(&config, "heartbeat_check_interval must be at most 86400");

        let mut config = GatewayConfig::default();
        config.gateway.request_timeout = MAX_DURATION_SECS + 1;
        assert_invalid(&config, "request_timeout must be at most");

        let mut config = GatewayConfig::default();
        config.gateway.heartbeat_timeout = MAX_DURATION_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_server() {
        let mut config = GatewayConfig::default();
        config.server.http_port = config.server.port;
        assert_invalid(&config, "must differ");

        let mut config = GatewayConfig::default();
        config.server.ws_path = "ws".to_string();
        assert_invalid(&config, "ws_path");

        let mut config = GatewayConfig::default();
        config.gateway.default_vehicle_id = "  ".to_string();
        assert_invalid(&config, "default_vehicle_id");
    }

    #[test]
    fn test_args_override() {
        let args = Args::parse_from([
            "vehicle-gateway",
            "--config",
            "gw.toml",
            "--host",
            "0.0.0.0",
            "--port",
            "7001",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.config, PathBuf::from("gw.toml"));

        let mut config = GatewayConfig::default();
        args.apply(&mut config);
        assert_eq!(config.ws_addr(), "0.0.0.0:7001".parse().expect("addr"));
        assert_eq!(config.server.http_port, 5002);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[gateway]\nheartbeat_timeout = 90").expect("write");

        let config = GatewayConfig::load(file.path()).expect("load");
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_load_invalid_file_names_path() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[gateway]\nheartbeat_timeout = \"soon\"").expect("write");

        let err = GatewayConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.toml");

        assert!(matches!(GatewayConfig::load(&path), Err(Error::Io(_))));
        assert!(GatewayConfig::load_optional(&path).expect("optional").is_none());
    }
}
