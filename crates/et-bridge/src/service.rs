// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Long-running bridge between two served systems.

use crate::bridge::{bridge, BridgeError, Transfer};
use crate::config::ServiceConfig;
use et::{AttachmentId, Error, RemoteSystem, StationConfig, StationId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pause after a call that moved nothing.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Counters of a running service.
#[derive(Debug)]
pub struct BridgeStats {
    /// Bridge calls made.
    pub calls: AtomicU64,

    /// Events copied into the destination.
    pub events: AtomicU64,

    /// Payload bytes copied.
    pub bytes: AtomicU64,

    /// Calls that ended early on a timeout or wakeup.
    pub idle: AtomicU64,

    /// Calls that failed.
    pub errors: AtomicU64,

    /// Service start time.
    pub started: Instant,
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self {
            calls: AtomicU64::new(0),
            events: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            idle: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl BridgeStats {
    pub fn record(&self, transfer: &Transfer) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.events
            .fetch_add(transfer.transferred as u64, Ordering::Relaxed);
        self.bytes.fetch_add(transfer.bytes, Ordering::Relaxed);
        if transfer.stopped.is_some() {
            self.idle.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_error(&self, transferred: usize) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.events
            .fetch_add(transferred as u64, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            idle: self.idle.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Snapshot of service statistics.
#[derive(Debug, Clone)]
pub struct BridgeStatsSnapshot {
    pub calls: u64,
    pub events: u64,
    pub bytes: u64,
    pub idle: u64,
    pub errors: u64,
    pub uptime_secs: u64,
}

impl BridgeStatsSnapshot {
    pub fn events_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.events as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }

    pub fn bytes_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.bytes as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}

/// Handle to control a running service.
#[derive(Clone)]
pub struct ServiceHandle {
    running: Arc<AtomicBool>,
    stats: Arc<BridgeStats>,
}

impl ServiceHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Ask the service loop to stop after its current call.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Two remote systems and the attachments the bridge moves events between.
pub struct BridgeService {
    config: ServiceConfig,
    from: RemoteSystem,
    to: RemoteSystem,
    from_att: AttachmentId,
    to_att: AttachmentId,
    running: Arc<AtomicBool>,
    stats: Arc<BridgeStats>,
}

impl BridgeService {
    /// Connect to both systems and attach.
    pub fn connect(config: ServiceConfig) -> Result<Self, BridgeError> {
        config.validate()?;

        let from = RemoteSystem::connect(config.from.address.as_str())?;
        let to = RemoteSystem::connect(config.to.address.as_str())?;
        tracing::info!(
            "connected {} ({} x {} B) -> {} ({} x {} B)",
            from.peer_addr(),
            from.nevents(),
            from.event_size(),
            to.peer_addr(),
            to.nevents(),
            to.event_size()
        );

        let from_station = match &config.from.station {
            Some(name) => from.create_station(name, StationConfig::new())?,
            None => return Err(Error::BadArgument("from.station is required".into()).into()),
        };
        let to_station = match &config.to.station {
            Some(name) => to.create_station(name, StationConfig::new())?,
            None => StationId::GRAND_CENTRAL,
        };

        let from_att = from.attach(from_station)?;
        let to_att = to.attach(to_station)?;
        tracing::debug!(
            "attached {} to source station {}, {} to destination station {}",
            from_att,
            from_station,
            to_att,
            to_station
        );

        Ok(Self {
            config,
            from,
            to,
            from_att,
            to_att,
            running: Arc::new(AtomicBool::new(true)),
            stats: Arc::new(BridgeStats::default()),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            running: Arc::clone(&self.running),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Bridge until stopped or until either system goes away.
    ///
    /// Returns the number of events moved.
    pub fn run(&self) -> Result<u64, BridgeError> {
        let result = self.run_loop();
        self.running.store(false, Ordering::Relaxed);
        result.map(|()| self.stats.events.load(Ordering::Relaxed))
    }

    fn run_loop(&self) -> Result<(), BridgeError> {
        while self.running.load(Ordering::Relaxed) {
            match bridge(
                &self.from,
                &self.to,
                self.from_att,
                self.to_att,
                &self.config.transfer,
                self.config.batch,
            ) {
                Ok(transfer) => {
                    self.stats.record(&transfer);
                    if transfer.transferred == 0 {
                        std::thread::sleep(IDLE_BACKOFF);
                    }
                }
                Err(BridgeError::Interrupted {
                    transferred,
                    source,
                }) => {
                    self.stats.record_error(transferred);
                    if source.is_terminal() {
                        tracing::error!("bridge stopped: {}", source);
                        return Err(BridgeError::Interrupted {
                            transferred,
                            source,
                        });
                    }
                    tracing::warn!("bridge call failed after {} events: {}", transferred, source);
                }
                Err(e) => {
                    self.stats.record_error(0);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Detach from both systems and close the connections.
    pub fn shutdown(self) {
        if let Err(e) = self.from.detach(self.from_att) {
            tracing::warn!("source detach failed: {}", e);
        }
        if let Err(e) = self.to.detach(self.to_att) {
            tracing::warn!("destination detach failed: {}", e);
        }
        let _ = self.from.close();
        let _ = self.to.close();
    }
}
