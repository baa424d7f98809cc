//! Monitor configuration: the backend list, credentials, and timing
//! parameters the rest of the crate is parameterized over.
//!
//! Loaded from a TOML file the way `spineldb`'s `Config::from_file` reads
//! and parses its own TOML file directly with `toml::from_str` (`pgdog`'s
//! configuration surface is an order of magnitude larger and not a fit for
//! this crate's handful of knobs).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3306
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMonitorConfig {
    pub servers: Vec<ServerConfig>,
    pub monitor_user: String,
    pub monitor_password: String,
    #[serde(default = "default_replication_user")]
    pub replication_user: String,
    #[serde(default)]
    pub replication_password: String,
    #[serde(default)]
    pub replication_ssl: bool,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_budget_ms")]
    pub switchover_timeout_ms: u64,
    #[serde(default = "default_budget_ms")]
    pub failover_timeout_ms: u64,
    /// Identify a slave's parent by hostname:port rather than server_id
    /// when false.
    #[serde(default = "default_true")]
    pub assume_unique_hostnames: bool,
    /// Percentage of a backend's `information_schema.disks` capacity used
    /// before it is considered low on disk. `None` disables the check.
    #[serde(default)]
    pub disk_space_threshold_pct: Option<u8>,
    /// SQL file run against the demoted server during a switchover/failover,
    /// after it is set read-only.
    #[serde(default)]
    pub demotion_sql_file: Option<String>,
    /// SQL file run against the promoted server during a switchover/failover,
    /// after it is set read-write.
    #[serde(default)]
    pub promotion_sql_file: Option<String>,
}

fn default_replication_user() -> String {
    "repl".into()
}

fn default_tick_interval_ms() -> u64 {
    2_000
}

fn default_budget_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

/// Resolved configuration with secrets wrapped so they can't be
/// accidentally `Debug`-printed (the `mariadb_exporter`
/// `secrecy::SecretString` pattern for its DSN, applied here to the
/// monitor's own and the replication credentials).
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub servers: Vec<ServerConfig>,
    pub monitor_user: String,
    pub monitor_password: SecretString,
    pub replication_user: String,
    pub replication_password: SecretString,
    pub replication_ssl: bool,
    pub tick_interval: Duration,
    pub switchover_timeout: Duration,
    pub failover_timeout: Duration,
    pub assume_unique_hostnames: bool,
    pub disk_space_threshold_pct: Option<u8>,
    pub demotion_sql_file: Option<PathBuf>,
    pub promotion_sql_file: Option<PathBuf>,
}

impl MonitorConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("reading {:?}: {e}", path.as_ref())))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawMonitorConfig =
            toml::from_str(contents).map_err(|e| Error::Config(format!("parsing TOML: {e}")))?;
        Ok(raw.into())
    }
}

impl From<RawMonitorConfig> for MonitorConfig {
    fn from(raw: RawMonitorConfig) -> Self {
        Self {
            servers: raw.servers,
            monitor_user: raw.monitor_user,
            monitor_password: SecretString::from(raw.monitor_password),
            replication_user: raw.replication_user,
            replication_password: SecretString::from(raw.replication_password),
            replication_ssl: raw.replication_ssl,
            tick_interval: Duration::from_millis(raw.tick_interval_ms),
            switchover_timeout: Duration::from_millis(raw.switchover_timeout_ms),
            failover_timeout: Duration::from_millis(raw.failover_timeout_ms),
            assume_unique_hostnames: raw.assume_unique_hostnames,
            disk_space_threshold_pct: raw.disk_space_threshold_pct,
            demotion_sql_file: raw.demotion_sql_file.map(PathBuf::from),
            promotion_sql_file: raw.promotion_sql_file.map(PathBuf::from),
        }
    }
}

/// Expose the monitor password only at the point of connecting; never kept
/// around as a plain `String`.
pub fn expose(secret: &SecretString) -> &str {
    secret.expose_secret()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            monitor_user = "monitor"
            monitor_password = "secret"

            [[servers]]
            name = "node1"
            host = "10.0.0.1"
            port = 3306

            [[servers]]
            name = "node2"
            host = "10.0.0.2"
        "#;

        let config = MonitorConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[1].port, 3306);
        assert_eq!(config.replication_user, "repl");
        assert_eq!(config.tick_interval, Duration::from_millis(2000));
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let err = MonitorConfig::from_toml_str("not valid toml [[[").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
