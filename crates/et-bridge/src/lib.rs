// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ET bridge
//!
//! Moves events from a station of one ET system into another system, local
//! or served over TCP, optionally swapping payload byte order on the way.
//!
//! # Quick Start
//!
//! ```bash
//! # Bridge station "bridge" of one system into another
//! et-bridge --from daq1:11111 --to daq2:11111 --station bridge
//!
//! # Using config file
//! et-bridge --config bridge.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! batch = 1000
//!
//! [from]
//! address = "daq1:11111"
//! station = "bridge"
//!
//! [to]
//! address = "daq2:11111"
//!
//! [transfer]
//! mode_from = "timed"
//! timeout_from_ms = 1000
//! chunk_from = 100
//! chunk_to = 100
//! swap = "words32"
//! ```

pub mod bridge;
pub mod config;
pub mod service;

pub use bridge::{bridge, BridgeError, BridgeEvent, Endpoint, Transfer};
pub use config::{BridgeConfig, ConfigError, EndpointConfig, ServiceConfig, SwapFn, SwapKind, Wait};
pub use service::{BridgeService, BridgeStats, BridgeStatsSnapshot, ServiceHandle};
