//! # Config — Panel Configuration File
//!
//! Optional TOML file layered under CLI flags and environment variables.
//! Every section has defaults, so an empty file (or no file) is valid.
//!
//! ```toml
//! [server]
//! port = 8080
//! request_timeout_secs = 30
//!
//! [database]
//! max_connections = 5
//! read_retries = 3
//!
//! [staleness]
//! integrate_secs = 1800
//! sad_secs = 3000
//!
//! [cloud]
//! local_network_prefix = "164.54.212"
//!
//! [poller]
//! results_secs = 5
//! max_backoff_secs = 120
//! ```

use crate::classify::Staleness;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration parsed from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub staleness: Staleness,
    pub cloud: CloudConfig,
    pub poller: PollerConfig,
}

/// The `[server]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 8080,
            static_dir: None,
            request_timeout_secs: 30,
            body_limit_bytes: 1024 * 1024,
        }
    }
}

/// The `[database]` section. The URL itself comes from `DATABASE_URL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    /// Attempts for idempotent reads that hit a transient failure.
    pub read_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            max_connections: 5,
            read_retries: 3,
            retry_delay_ms: 200,
        }
    }
}

/// The `[cloud]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Clients whose address starts with this prefix see the local-network
    /// availability counters; everyone else sees the remote ones.
    pub local_network_prefix: Option<String>,
}

impl CloudConfig {
    pub fn is_local(&self, ip_address: &str) -> bool {
        match self.local_network_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => ip_address.starts_with(prefix),
            _ => false,
        }
    }
}

/// The `[poller]` section: client-side poll cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub results_secs: u64,
    pub processes_secs: u64,
    pub cloud_secs: u64,
    pub cloud_waiting_secs: u64,
    pub status_active_secs: u64,
    pub status_idle_secs: u64,
    pub max_backoff_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            results_secs: 5,
            processes_secs: 5,
            cloud_secs: 10,
            cloud_waiting_secs: 5,
            status_active_secs: 30,
            status_idle_secs: 60,
            max_backoff_secs: 120,
            request_timeout_secs: 10,
        }
    }
}

impl PollerConfig {
    pub fn results_interval(&self) -> Duration {
        Duration::from_secs(self.results_secs)
    }

    pub fn processes_interval(&self) -> Duration {
        Duration::from_secs(self.processes_secs)
    }

    pub fn cloud_interval(&self, waiting: bool) -> Duration {
        if waiting {
            Duration::from_secs(self.cloud_waiting_secs)
        } else {
            Duration::from_secs(self.cloud_secs)
        }
    }

    pub fn status_interval(&self, active: bool) -> Duration {
        if active {
            Duration::from_secs(self.status_active_secs)
        } else {
            Duration::from_secs(self.status_idle_secs)
        }
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

impl PanelConfig {
    /// Parse a TOML string and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PanelConfig = toml::from_str(text).context("invalid panel config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise return the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("reading config {}", p.display()))?;
                Self::from_toml_str(&text)
            }
            None => Ok(PanelConfig::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.staleness;
        if s.integrate_secs <= 0 || s.merge_secs <= 0 || s.sad_secs <= 0 || s.mr_secs <= 0 {
            bail!("staleness thresholds must be positive");
        }
        let p = &self.poller;
        let intervals = [
            p.results_secs,
            p.processes_secs,
            p.cloud_secs,
            p.cloud_waiting_secs,
            p.status_active_secs,
            p.status_idle_secs,
        ];
        if intervals.iter().any(|&v| v == 0) {
            bail!("poll intervals must be at least 1 second");
        }
        if p.max_backoff_secs < p.results_secs {
            bail!("poller.max_backoff_secs must be >= poller.results_secs");
        }
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be positive");
        }
        if self.database.read_retries == 0 {
            bail!("database.read_retries must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let config = PanelConfig::from_toml_str("").unwrap();
        assert_eq!(config, PanelConfig::default());
        assert_eq!(config.staleness.integrate_secs, 1800);
        assert_eq!(config.staleness.sad_secs, 3000);
        assert_eq!(config.poller.results_secs, 5);
        assert_eq!(config.poller.cloud_secs, 10);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = PanelConfig::from_toml_str(
            r#"
            [staleness]
            integrate_secs = 600

            [server]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(config.staleness.integrate_secs, 600);
        assert_eq!(config.staleness.mr_secs, 3000);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.request_timeout_secs, 30);
    }

    #[test]
    fn zero_interval_rejected() {
        let err = PanelConfig::from_toml_str("[poller]\nresults_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("poll intervals"));
    }

    #[test]
    fn negative_staleness_rejected() {
        assert!(PanelConfig::from_toml_str("[staleness]\nsad_secs = -1\n").is_err());
    }

    #[test]
    fn unknown_types_are_errors() {
        assert!(PanelConfig::from_toml_str("[server]\nport = \"eighty\"\n").is_err());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cloud]\nlocal_network_prefix = \"164.54.212\"").unwrap();
        let config = PanelConfig::load(Some(file.path())).unwrap();
        assert!(config.cloud.is_local("164.54.212.15"));
        assert!(!config.cloud.is_local("10.0.0.2"));
    }

    #[test]
    fn load_without_path_is_default() {
        assert_eq!(PanelConfig::load(None).unwrap(), PanelConfig::default());
    }

    #[test]
    fn missing_prefix_means_remote() {
        let cloud = CloudConfig::default();
        assert!(!cloud.is_local("127.0.0.1"));
    }

    #[test]
    fn cloud_interval_shortens_while_waiting() {
        let p = PollerConfig::default();
        assert_eq!(p.cloud_interval(true), Duration::from_secs(5));
        assert_eq!(p.cloud_interval(false), Duration::from_secs(10));
        assert_eq!(p.status_interval(false), Duration::from_secs(60));
    }
}
