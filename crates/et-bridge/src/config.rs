// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! The transfer parameters load from TOML; a custom swap function can only
//! be set in code.

use et::{swap32_in_place, WaitMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
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

/// Payload swap, applied in place to the copied bytes.
pub type SwapFn = Arc<dyn Fn(&mut [u8]) + Send + Sync>;

/// How a get or new-events call waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Wait {
    Sleep,
    Timed,
    Async,
}

/// Built-in payload swaps selectable from a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapKind {
    /// Reverse every 32-bit word.
    Words32,
}

/// Parameters of one bridge call.
#[derive(Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Wait mode when getting events from the source.
    #[serde(default = "default_wait")]
    pub mode_from: Wait,

    /// Source timeout (ms) for `timed`.
    #[serde(default = "default_timeout_ms")]
    pub timeout_from_ms: u64,

    /// Wait mode when asking the destination for new events.
    #[serde(default = "default_wait")]
    pub mode_to: Wait,

    /// Destination timeout (ms) for `timed`.
    #[serde(default = "default_timeout_ms")]
    pub timeout_to_ms: u64,

    /// Events per source get.
    #[serde(default = "default_chunk")]
    pub chunk_from: usize,

    /// Events per destination new-events request.
    #[serde(default = "default_chunk")]
    pub chunk_to: usize,

    /// Built-in swap for payloads not in native order.
    #[serde(default)]
    pub swap: Option<SwapKind>,

    /// Custom swap; takes precedence over `swap`.
    #[serde(skip)]
    pub swap_fn: Option<SwapFn>,
}

fn default_wait() -> Wait {
    Wait::Timed
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_chunk() -> usize {
    100
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode_from: default_wait(),
            timeout_from_ms: default_timeout_ms(),
            mode_to: default_wait(),
            timeout_to_ms: default_timeout_ms(),
            chunk_from: default_chunk(),
            chunk_to: default_chunk(),
            swap: None,
            swap_fn: None,
        }
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("mode_from", &self.mode_from)
            .field("timeout_from_ms", &self.timeout_from_ms)
            .field("mode_to", &self.mode_to)
            .field("timeout_to_ms", &self.timeout_to_ms)
            .field("chunk_from", &self.chunk_from)
            .field("chunk_to", &self.chunk_to)
            .field("swap", &self.swap)
            .field("swap_fn", &self.swap_fn.is_some())
            .finish()
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunks(mut self, chunk_from: usize, chunk_to: usize) -> Self {
        self.chunk_from = chunk_from;
        self.chunk_to = chunk_to;
        self
    }

    pub fn with_mode_from(mut self, mode: WaitMode) -> Self {
        (self.mode_from, self.timeout_from_ms) = split_mode(mode);
        self
    }

    pub fn with_mode_to(mut self, mode: WaitMode) -> Self {
        (self.mode_to, self.timeout_to_ms) = split_mode(mode);
        self
    }

    pub fn with_swap(mut self, swap: impl Fn(&mut [u8]) + Send + Sync + 'static) -> Self {
        let swap: SwapFn = Arc::new(swap);
        self.swap_fn = Some(swap);
        self
    }

    pub fn wait_from(&self) -> WaitMode {
        join_mode(self.mode_from, self.timeout_from_ms)
    }

    pub fn wait_to(&self) -> WaitMode {
        join_mode(self.mode_to, self.timeout_to_ms)
    }

    /// The swap in effect, if any.
    pub fn swapper(&self) -> Option<SwapFn> {
        match (&self.swap_fn, self.swap) {
            (Some(f), _) => Some(Arc::clone(f)),
            (None, Some(SwapKind::Words32)) => {
                let swap: SwapFn = Arc::new(swap32_in_place);
                Some(swap)
            }
            (None, None) => None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_from < 1 {
            return Err(ConfigError::Invalid("chunk_from must be at least 1".into()));
        }
        if self.chunk_to < 1 {
            return Err(ConfigError::Invalid("chunk_to must be at least 1".into()));
        }
        Ok(())
    }
}

fn split_mode(mode: WaitMode) -> (Wait, u64) {
    match mode {
        WaitMode::Sleep => (Wait::Sleep, 0),
        WaitMode::Timed(d) => (Wait::Timed, d.as_millis() as u64),
        WaitMode::Async => (Wait::Async, 0),
    }
}

fn join_mode(wait: Wait, timeout_ms: u64) -> WaitMode {
    match wait {
        Wait::Sleep => WaitMode::Sleep,
        Wait::Timed => WaitMode::Timed(Duration::from_millis(timeout_ms)),
        Wait::Async => WaitMode::Async,
    }
}

/// One side of the `et-bridge` service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Address of the served system (`host:port`).
    pub address: String,

    /// Station to attach to. The source station is created when missing;
    /// the destination attaches to GrandCentral when unset.
    #[serde(default)]
    pub station: Option<String>,
}

/// Configuration of the `et-bridge` service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name (for identification).
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Events moved per bridge call.
    #[serde(default = "default_batch")]
    pub batch: usize,

    /// Statistics reporting interval (seconds, 0 to disable).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    pub from: EndpointConfig,

    pub to: EndpointConfig,

    #[serde(default)]
    pub transfer: BridgeConfig,
}

fn default_service_name() -> String {
    "et-bridge".to_string()
}

fn default_batch() -> usize {
    1000
}

fn default_stats_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    /// Bridge `from` to `to` with default transfer settings.
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            name: default_service_name(),
            from: EndpointConfig {
                address: from.to_string(),
                station: None,
            },
            to: EndpointConfig {
                address: to.to_string(),
                station: None,
            },
            batch: default_batch(),
            transfer: BridgeConfig::default(),
            stats_interval_secs: default_stats_interval(),
            log_level: default_log_level(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.from.address.is_empty() || self.to.address.is_empty() {
            return Err(ConfigError::Invalid("Both addresses are required".into()));
        }
        if self.from.address == self.to.address {
            return Err(ConfigError::Invalid(format!(
                "Source and destination are the same system ({})",
                self.from.address
            )));
        }
        if self.from.station.is_none() {
            return Err(ConfigError::Invalid("from.station is required".into()));
        }
        if self.batch < 1 {
            return Err(ConfigError::Invalid("batch must be at least 1".into()));
        }
        self.transfer.validate()
    }
}
