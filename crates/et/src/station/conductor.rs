// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-station conductor thread.
//!
//! A conductor waits on its station's output list, takes everything, and
//! walks the main chain downstream offering the batch to each active station
//! or parallel group. Whatever is left when the walk runs past the tail goes
//! back to GrandCentral.
//!
//! Lock order while routing: own transfer lock, then the topology read lock,
//! then one input list at a time.

use super::select::{equal_cue_shares, round_robin, select_for};
use super::topology::Topology;
use super::{SelectionPolicy, Station, StationId};
use crate::error::{Error, Result};
use crate::event::{Event, EventPool};
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Commands accepted by a conductor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    /// Drain the output list and exit.
    Kill,
}

pub(crate) struct Conductor {
    station: Arc<Station>,
    grand_central: Arc<Station>,
    topology: Arc<RwLock<Topology>>,
    pool: Arc<EventPool>,
    commands: Receiver<Command>,
    grace: Duration,
}

impl Conductor {
    fn run(self) {
        log::debug!("[Conductor] {} started", self.station.id());
        loop {
            match self.station.output.take_all_blocking() {
                Some(batch) => self.route(batch),
                None => match self.commands.try_recv() {
                    Ok(Command::Kill) | Err(TryRecvError::Disconnected) => {
                        self.drain();
                        break;
                    }
                    Err(TryRecvError::Empty) => continue,
                },
            }
        }
        log::debug!("[Conductor] {} stopped", self.station.id());
    }

    /// Route what is left in the output list, then give up on the rest.
    fn drain(&self) {
        let deadline = Instant::now() + self.grace;
        loop {
            let batch = self.station.output.take_all();
            if batch.is_empty() {
                return;
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "[Conductor::drain] {} abandoned {} events after {:?}",
                    self.station.id(),
                    batch.len(),
                    self.grace
                );
                self.to_grand_central(batch);
                return;
            }
            self.route(batch);
        }
    }

    fn route(&self, mut batch: Vec<Event>) {
        let _transfer = self.station.lock_transfer();
        let topology = self.topology.read();

        let mut cursor = topology.next_main(self.station.id());
        while let Some(head) = cursor {
            if batch.is_empty() {
                break;
            }
            let members: Vec<Arc<Station>> = topology
                .group(head)
                .into_iter()
                .filter(|&id| topology.is_active(id))
                .filter_map(|id| topology.station(id).cloned())
                .collect();

            if !members.is_empty() {
                let policy = topology
                    .station(head)
                    .map(|s| s.config().select)
                    .unwrap_or_default();
                match policy {
                    SelectionPolicy::RoundRobin => {
                        let group = topology.group(head);
                        deal_round_robin(&topology, &group, &members, std::mem::take(&mut batch));
                    }
                    SelectionPolicy::EqualCue => {
                        deal_equal_cue(&members, std::mem::take(&mut batch));
                    }
                    _ => {
                        for member in &members {
                            offer(member, &mut batch);
                            if batch.is_empty() {
                                break;
                            }
                        }
                    }
                }
            }
            cursor = topology.next_main(head);
        }

        self.to_grand_central(batch);
    }

    fn to_grand_central(&self, batch: Vec<Event>) {
        if batch.is_empty() {
            return;
        }
        self.pool.recycle(&batch);
        self.grand_central.input.put_in_low(batch);
    }
}

/// Offer the batch to one station; it keeps what its rules select.
fn offer(station: &Station, batch: &mut Vec<Event>) {
    let config = station.config();
    let mut input = station.input.transfer();
    let before = input.tried();
    let mut tried = before;
    let queued = input.len();
    let taken = select_for(&config, batch, queued, &mut tried);
    input.add_tried(tried - before);
    input.put_all(taken);
}

fn deal_round_robin(
    topology: &Topology,
    group: &[StationId],
    members: &[Arc<Station>],
    batch: Vec<Event>,
) {
    let start = members
        .iter()
        .position(|m| m.is_last())
        .map_or(0, |i| (i + 1) % members.len());
    let (shares, last) = round_robin(batch, members.len(), start);
    let Some(last) = last else {
        return;
    };

    for id in group {
        if let Some(station) = topology.station(*id) {
            station.set_last(false);
        }
    }
    members[last].set_last(true);

    for (member, share) in members.iter().zip(shares) {
        let mut input = member.input.transfer();
        input.add_tried(share.len() as u64);
        input.put_all(share);
    }
}

fn deal_equal_cue(members: &[Arc<Station>], mut batch: Vec<Event>) {
    let counts: Vec<usize> = members.iter().map(|m| m.input.len()).collect();
    let shares = equal_cue_shares(&counts, batch.len());
    for (member, n) in members.iter().zip(shares) {
        let share: Vec<Event> = batch.drain(..n.min(batch.len())).collect();
        let mut input = member.input.transfer();
        input.add_tried(share.len() as u64);
        input.put_all(share);
    }
}

/// Handle on a running conductor.
pub(crate) struct ConductorHandle {
    station: Arc<Station>,
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl ConductorHandle {
    pub(crate) fn spawn(
        station: Arc<Station>,
        grand_central: Arc<Station>,
        topology: Arc<RwLock<Topology>>,
        pool: Arc<EventPool>,
        grace: Duration,
    ) -> Result<Self> {
        let (tx, rx) = channel::unbounded();
        let conductor = Conductor {
            station: Arc::clone(&station),
            grand_central,
            topology,
            pool,
            commands: rx,
            grace,
        };
        let thread = thread::Builder::new()
            .name(format!("et-conductor-{}", station.id().0))
            .spawn(move || conductor.run())
            .map_err(|e| Error::Generic(format!("failed to spawn conductor: {}", e)))?;
        Ok(Self {
            station,
            commands: tx,
            thread: Some(thread),
        })
    }

    /// Send `Kill`, release the wait and join the thread.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // a closed channel is treated as Kill too
        let _ = self.commands.send(Command::Kill);
        self.station.output.interrupt();
        if thread.join().is_err() {
            log::error!(
                "[Conductor] {} panicked while stopping",
                self.station.id()
            );
        }
    }
}

impl Drop for ConductorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
