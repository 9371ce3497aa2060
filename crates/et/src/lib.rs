// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # ET - Event Transfer
//!
//! An in-memory event-routing system: a fixed pool of reusable event buffers
//! circulates through an ordered graph of stations. Producers take free
//! events, fill them and put them back; each station's conductor thread
//! routes events to the stations downstream that select them; consumers
//! attached to a station get, inspect and put them on. Every event ends up
//! back at GrandCentral, the station that owns the free pool.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use et::{StationConfig, StationId, System, SystemConfig, WaitMode};
//!
//! fn main() -> et::Result<()> {
//!     let system = System::create(SystemConfig::default().with_events(100, 256))?;
//!     let monitor = system.create_station("monitor", StationConfig::new())?;
//!
//!     let producer = system.attach(StationId::GRAND_CENTRAL)?;
//!     let consumer = system.attach(monitor)?;
//!
//!     let mut events = system.new_events(producer, WaitMode::Sleep, 0, 1)?;
//!     events[0].write(b"hello")?;
//!     system.put_events(producer, events)?;
//!
//!     let events = system.get_events(consumer, WaitMode::Sleep, 10)?;
//!     system.put_events(consumer, events)?;
//!     system.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   GrandCentral --> serial --> [parallel group] --> serial --> (back to GrandCentral)
//!       input          in/out      head, members      in/out
//! ```
//!
//! | Type | Description |
//! |------|-------------|
//! | [`System`] | Owns the pool, the station graph, attachments and the heartbeat |
//! | [`Event`] | Move-only handle to one pooled buffer |
//! | [`StationConfig`] | Flow, blocking, selection and restore policy of a station |
//! | [`RemoteSystem`] | The same operations against a system served over TCP |
//!
//! ## Modules Overview
//!
//! - [`system`] - create, close, stations, attachments, event operations
//! - [`station`] - station configuration, selection and topology positions
//! - [`event`] - events, event lists and the pool
//! - [`wire`] / [`transport`] - the socket protocol
//! - [`remote`] - the client side of the socket protocol

pub mod attachment;
pub mod config;
pub mod error;
pub mod event;
pub(crate) mod heartbeat;
pub mod remote;
pub(crate) mod server;
pub mod station;
pub mod system;
pub mod transport;
pub mod wire;

/// Default limit on simultaneous attachments.
pub const ATTACHMENTS_MAX: usize = 100;

pub use attachment::{AttachmentId, AttachmentStatsSnapshot};
pub use config::{ConfigError, SystemConfig};
pub use error::{Error, Refused, Result};
pub use event::{
    swap32, swap32_in_place, Age, Census, ControlWords, DataStatus, Event, Owner, Priority,
    WaitMode, BYTE_ORDER_NATIVE, BYTE_ORDER_SWAPPED, CONTROL_WORDS,
};
pub use remote::{RemoteEvent, RemoteSystem};
pub use station::{
    BlockMode, FlowMode, ParallelPosition, Position, RestoreMode, SelectionPolicy, StationConfig,
    StationId, StationStatus,
};
pub use system::System;
