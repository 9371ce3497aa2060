// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! System configuration.
//!
//! Supports both programmatic and file-based configuration.
//!
//! ```toml
//! name = "daq"
//! nevents = 1000
//! event_size = 4096
//! groups = [600, 400]
//! server = "127.0.0.1:11111"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration of one ET system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// System name (for identification in logs and on the wire).
    #[serde(default = "default_name")]
    pub name: String,

    /// Number of events in the pool.
    #[serde(default = "default_nevents")]
    pub nevents: usize,

    /// Capacity of each pooled event in bytes.
    #[serde(default = "default_event_size")]
    pub event_size: usize,

    /// Maximum number of simultaneously oversized (temp) events.
    #[serde(default = "default_ntemps")]
    pub ntemps: usize,

    /// Maximum number of stations, GrandCentral included.
    #[serde(default = "default_stations_max")]
    pub stations_max: usize,

    /// Maximum number of attachments across all stations.
    #[serde(default = "default_attachments_max")]
    pub attachments_max: usize,

    /// Event counts per producer group. Must sum to `nevents`;
    /// empty means a single group holding every event.
    #[serde(default)]
    pub groups: Vec<usize>,

    /// Heartbeat period (milliseconds).
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    /// How long a killed conductor keeps routing leftovers (milliseconds).
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,

    /// TCP address to serve this system on, if any.
    #[serde(default)]
    pub server: Option<String>,
}

fn default_name() -> String {
    "et".to_string()
}

fn default_nevents() -> usize {
    300
}

fn default_event_size() -> usize {
    1024
}

fn default_ntemps() -> usize {
    300
}

fn default_stations_max() -> usize {
    200
}

fn default_attachments_max() -> usize {
    crate::ATTACHMENTS_MAX
}

fn default_heartbeat_ms() -> u64 {
    500
}

fn default_drain_grace_ms() -> u64 {
    500
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            nevents: default_nevents(),
            event_size: default_event_size(),
            ntemps: default_ntemps(),
            stations_max: default_stations_max(),
            attachments_max: default_attachments_max(),
            groups: Vec::new(),
            heartbeat_ms: default_heartbeat_ms(),
            drain_grace_ms: default_drain_grace_ms(),
            server: None,
        }
    }
}

impl SystemConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nevents < 1 {
            return Err(ConfigError::Invalid("nevents must be at least 1".into()));
        }
        if self.event_size < 1 {
            return Err(ConfigError::Invalid("event_size must be at least 1".into()));
        }
        if self.stations_max < 2 {
            return Err(ConfigError::Invalid(
                "stations_max must leave room for a station besides GrandCentral".into(),
            ));
        }
        if self.attachments_max < 1 {
            return Err(ConfigError::Invalid(
                "attachments_max must be at least 1".into(),
            ));
        }
        if !self.groups.is_empty() {
            if self.groups.iter().any(|&n| n == 0) {
                return Err(ConfigError::Invalid("empty producer group".into()));
            }
            let total: usize = self.groups.iter().sum();
            if total != self.nevents {
                return Err(ConfigError::Invalid(format!(
                    "groups hold {} events but nevents is {}",
                    total, self.nevents
                )));
            }
        }
        if self.heartbeat_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat_ms must be positive".into()));
        }
        Ok(())
    }

    /// Number of producer groups.
    pub fn group_count(&self) -> usize {
        self.groups.len().max(1)
    }

    /// Group (1-based) of the event with the given pool index.
    pub fn group_of(&self, index: usize) -> u32 {
        let mut upper = 0;
        for (i, &n) in self.groups.iter().enumerate() {
            upper += n;
            if index < upper {
                return i as u32 + 1;
            }
        }
        1
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    /// Set the pool geometry.
    pub fn with_events(mut self, nevents: usize, event_size: usize) -> Self {
        self.nevents = nevents;
        self.event_size = event_size;
        self
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set producer group sizes.
    pub fn with_groups(mut self, groups: Vec<usize>) -> Self {
        self.groups = groups;
        self
    }

    /// Set the temp event limit.
    pub fn with_ntemps(mut self, ntemps: usize) -> Self {
        self.ntemps = ntemps;
        self
    }

    /// Set the station and attachment limits.
    pub fn with_limits(mut self, stations_max: usize, attachments_max: usize) -> Self {
        self.stations_max = stations_max;
        self.attachments_max = attachments_max;
        self
    }

    /// Set the heartbeat period.
    pub fn with_heartbeat(mut self, period: Duration) -> Self {
        self.heartbeat_ms = period.as_millis().max(1) as u64;
        self
    }

    /// Set the conductor drain grace period.
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Serve the system on a TCP address.
    pub fn with_server(mut self, addr: impl Into<String>) -> Self {
        self.server = Some(addr.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SystemConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.group_count(), 1);
        assert_eq!(config.group_of(299), 1);
    }

    #[test]
    fn test_groups_must_cover_pool() {
        let config = SystemConfig::default().with_events(10, 64).with_groups(vec![4, 5]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = SystemConfig::default().with_events(10, 64).with_groups(vec![4, 6]);
        assert!(config.validate().is_ok());
        assert_eq!(config.group_of(3), 1);
        assert_eq!(config.group_of(4), 2);
        assert_eq!(config.group_of(9), 2);
    }

    #[test]
    fn test_parse_toml() {
        let config = SystemConfig::from_toml(
            r#"
            name = "daq"
            nevents = 50
            event_size = 256
            drain_grace_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "daq");
        assert_eq!(config.nevents, 50);
        assert_eq!(config.event_size, 256);
        assert_eq!(config.drain_grace(), Duration::from_millis(100));
        assert_eq!(config.ntemps, 300);
        assert!(config.server.is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "nevents = 0").unwrap();
        assert!(matches!(
            SystemConfig::from_file(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "nevents = 8\nserver = \"127.0.0.1:0\"").unwrap();
        let config = SystemConfig::from_file(file.path()).unwrap();
        assert_eq!(config.nevents, 8);
        assert_eq!(config.server.as_deref(), Some("127.0.0.1:0"));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SystemConfig::from_file("/nonexistent/et.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
