// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stations: named filtering and queueing nodes.
//!
//! ```text
//!   client put --> output --conductor--> input of a later station --> client get
//! ```
//!
//! A station owns an input and an output [`EventList`]. Its links to other
//! stations live in the [`topology`] arena, not in the station itself.

pub mod config;
pub(crate) mod conductor;
pub mod select;
pub(crate) mod topology;

use crate::event::EventList;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

pub use config::{
    BlockMode, FlowMode, RestoreMode, SelectionPolicy, StationConfig, UserSelect, DEFAULT_CUE,
    SELECT_NONE,
};
pub use topology::{ParallelPosition, Position};

/// Station identifier, the index of the station in the topology arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StationId(pub u32);

impl StationId {
    /// GrandCentral, the station that owns every free event.
    pub const GRAND_CENTRAL: StationId = StationId(0);

    pub fn is_grand_central(self) -> bool {
        self == Self::GRAND_CENTRAL
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "station#{}", self.0)
    }
}

/// Lifecycle state of a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StationStatus {
    #[default]
    Unused,
    Creating,
    /// No attachments: receives no events.
    Idle,
    Active,
}

impl StationStatus {
    /// Wire code of the status.
    pub fn code(self) -> u32 {
        match self {
            StationStatus::Unused => 0,
            StationStatus::Creating => 1,
            StationStatus::Idle => 2,
            StationStatus::Active => 3,
        }
    }
}

/// One station of a system.
pub struct Station {
    id: StationId,
    name: String,
    config: RwLock<StationConfig>,
    pub(crate) input: EventList,
    pub(crate) output: EventList,
    /// Held while the station's conductor routes a batch.
    transfer: Mutex<()>,
    /// Round-robin marker: this member received the last event of a batch.
    pub(crate) was_last: AtomicBool,
}

impl Station {
    pub(crate) fn new(id: StationId, name: String, config: StationConfig) -> Self {
        Self {
            id,
            name,
            config: RwLock::new(config),
            input: EventList::new(),
            output: EventList::new(),
            transfer: Mutex::new(()),
            was_last: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> StationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy of the current configuration.
    pub fn config(&self) -> StationConfig {
        self.config.read().clone()
    }

    pub(crate) fn replace_config(&self, config: StationConfig) {
        *self.config.write() = config;
    }

    /// Events waiting to be read by this station's attachments.
    pub fn input(&self) -> &EventList {
        &self.input
    }

    /// Events put by this station's attachments, waiting for the conductor.
    pub fn output(&self) -> &EventList {
        &self.output
    }

    pub(crate) fn lock_transfer(&self) -> MutexGuard<'_, ()> {
        self.transfer.lock()
    }

    pub(crate) fn is_last(&self) -> bool {
        self.was_last.load(Ordering::Acquire)
    }

    pub(crate) fn set_last(&self, last: bool) {
        self.was_last.store(last, Ordering::Release);
    }
}

impl fmt::Debug for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Station")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("input", &self.input.len())
            .field("output", &self.output.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grand_central_id() {
        assert!(StationId(0).is_grand_central());
        assert!(!StationId(3).is_grand_central());
        assert_eq!(StationId(3).to_string(), "station#3");
    }

    #[test]
    fn test_config_replace() {
        let station = Station::new(StationId(2), "s".into(), StationConfig::default());
        assert_eq!(station.config().prescale, 1);
        station.replace_config(StationConfig::new().with_prescale(4));
        assert_eq!(station.config().prescale, 4);
        assert_eq!(station.name(), "s");
    }
}
