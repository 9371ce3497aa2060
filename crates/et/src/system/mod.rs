// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The ET system: the registry that owns stations, attachments, the event
//! pool and the heartbeat.
//!
//! # Locks
//!
//! ```text
//!   registry (Mutex)
//!     -> lock-all: every station transfer lock in ascending id order
//!          -> topology write lock
//!   attachment table (Mutex), never held across a blocking get
//! ```
//!
//! Conductors take their own transfer lock and then the topology read lock,
//! so a lock-all excludes every routing pass while the topology changes.

mod attach;
mod events;
mod stations;

use crate::attachment::{Attachment, AttachmentId, AttachmentTable};
use crate::config::SystemConfig;
use crate::error::{Error, Result};
use crate::event::{Census, EventPool};
use crate::heartbeat::Heartbeat;
use crate::server::Server;
use crate::station::conductor::ConductorHandle;
use crate::station::topology::Topology;
use crate::station::{Station, StationConfig, StationId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Name of the station that owns every free event.
pub const GRAND_CENTRAL_NAME: &str = "GRAND_CENTRAL";

struct StationEntry {
    station: Arc<Station>,
    attachments: Vec<AttachmentId>,
    conductor: Option<ConductorHandle>,
}

#[derive(Default)]
struct Registry {
    stations: BTreeMap<StationId, StationEntry>,
    names: HashMap<String, StationId>,
}

impl Registry {
    fn entry(&self, id: StationId) -> Result<&StationEntry> {
        self.stations
            .get(&id)
            .ok_or_else(|| Error::Generic(format!("{} does not exist", id)))
    }

    fn entry_mut(&mut self, id: StationId) -> Result<&mut StationEntry> {
        self.stations
            .get_mut(&id)
            .ok_or_else(|| Error::Generic(format!("{} does not exist", id)))
    }

    /// Smallest id not taken by a live station.
    fn free_id(&self) -> StationId {
        let mut id = 1;
        for taken in self.stations.keys().skip(1) {
            if taken.0 != id {
                break;
            }
            id += 1;
        }
        StationId(id)
    }
}

/// One ET system.
pub struct System {
    config: SystemConfig,
    pool: Arc<EventPool>,
    grand_central: Arc<Station>,
    topology: Arc<RwLock<Topology>>,
    registry: Mutex<Registry>,
    attachments: Mutex<AttachmentTable>,
    heartbeat: Heartbeat,
    server: Mutex<Option<Server>>,
    closed: AtomicBool,
}

impl System {
    /// Build a system: allocate the pool, start GrandCentral and the heartbeat,
    /// and start the socket server if an address is configured.
    pub fn create(config: SystemConfig) -> Result<Arc<System>> {
        config.validate()?;

        let pool = Arc::new(EventPool::new(&config));
        let grand_central = Arc::new(Station::new(
            StationId::GRAND_CENTRAL,
            GRAND_CENTRAL_NAME.to_string(),
            StationConfig::default(),
        ));
        grand_central.input.put_in_low(pool.all_events());

        let topology = Arc::new(RwLock::new(Topology::new(Arc::clone(&grand_central))));
        let conductor = ConductorHandle::spawn(
            Arc::clone(&grand_central),
            Arc::clone(&grand_central),
            Arc::clone(&topology),
            Arc::clone(&pool),
            config.drain_grace(),
        )?;

        let mut registry = Registry::default();
        registry
            .names
            .insert(GRAND_CENTRAL_NAME.to_string(), StationId::GRAND_CENTRAL);
        registry.stations.insert(
            StationId::GRAND_CENTRAL,
            StationEntry {
                station: Arc::clone(&grand_central),
                attachments: Vec::new(),
                conductor: Some(conductor),
            },
        );

        let heartbeat = Heartbeat::start(&config.name, config.heartbeat_period())?;

        let system = Arc::new(System {
            attachments: Mutex::new(AttachmentTable::new(config.attachments_max)),
            config,
            pool,
            grand_central,
            topology,
            registry: Mutex::new(registry),
            heartbeat,
            server: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        if let Some(addr) = system.config.server.clone() {
            let server = Server::start(Arc::downgrade(&system), &addr)?;
            *system.server.lock() = Some(server);
        }

        log::debug!(
            "[System::create] '{}' with {} events of {} bytes",
            system.config.name,
            system.config.nevents,
            system.config.event_size
        );
        Ok(system)
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Capacity of a pooled event.
    pub fn event_size(&self) -> usize {
        self.pool.event_size()
    }

    pub fn nevents(&self) -> usize {
        self.pool.len()
    }

    /// Temp buffers currently in use.
    pub fn temps_in_use(&self) -> usize {
        self.pool.temps_in_use()
    }

    /// Address the socket server listens on, if one runs.
    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server.lock().as_ref().map(Server::local_addr)
    }

    /// Pool accounting. Exact only while no conductor is mid-batch.
    pub fn census(&self) -> Census {
        let registry = self.registry.lock();
        let mut queued = self.grand_central.output.len();
        for entry in registry.stations.values() {
            if !entry.station.id().is_grand_central() {
                queued += entry.station.input.len() + entry.station.output.len();
            }
        }
        Census {
            total: self.pool.len(),
            free: self.grand_central.input.len(),
            queued,
            checked_out: self.pool.checked_out(),
        }
    }

    /// Whether the heartbeat is still beating.
    pub fn is_alive(&self) -> bool {
        !self.is_closed() && self.heartbeat.is_alive()
    }

    /// Wait for the next heartbeat.
    pub fn wait_for_alive(&self, timeout: Duration) -> Result<()> {
        self.check_open()?;
        if self.heartbeat.wait_for_beat(timeout) {
            Ok(())
        } else {
            Err(Error::Timeout)
        }
    }

    /// Heartbeats so far.
    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeat.count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the server, every conductor and the heartbeat.
    ///
    /// Blocked readers are woken; every later call fails with
    /// [`Error::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(server) = self.server.lock().take() {
            server.stop();
        }

        let conductors: Vec<ConductorHandle> = {
            let mut registry = self.registry.lock();
            for entry in registry.stations.values() {
                entry.station.input.wakeup_all();
            }
            // GrandCentral last
            registry
                .stations
                .values_mut()
                .rev()
                .filter_map(|e| e.conductor.take())
                .collect()
        };
        for conductor in conductors {
            conductor.stop();
        }
        self.heartbeat.stop();
        log::debug!("[System::close] '{}' closed", self.config.name);
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Run `f` on the topology with every station transfer locked.
    fn lock_all<R>(
        &self,
        registry: &Registry,
        f: impl FnOnce(&mut Topology) -> Result<R>,
    ) -> Result<R> {
        let stations: Vec<Arc<Station>> = registry
            .stations
            .values()
            .map(|e| Arc::clone(&e.station))
            .collect();
        let _transfers: Vec<_> = stations.iter().map(|s| s.lock_transfer()).collect();
        let mut topology = self.topology.write();
        f(&mut topology)
    }

    pub(crate) fn attachment(&self, id: AttachmentId) -> Result<Arc<Attachment>> {
        self.attachments
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Generic(format!("{} does not exist", id)))
    }

    fn spawn_conductor(&self, station: &Arc<Station>) -> Result<ConductorHandle> {
        ConductorHandle::spawn(
            Arc::clone(station),
            Arc::clone(&self.grand_central),
            Arc::clone(&self.topology),
            Arc::clone(&self.pool),
            self.config.drain_grace(),
        )
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("name", &self.config.name)
            .field("nevents", &self.pool.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
