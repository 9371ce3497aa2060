// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Attach, detach and recovery of events held by departing attachments.

use super::System;
use crate::attachment::{Attachment, AttachmentId};
use crate::error::{Error, Result};
use crate::event::{Age, Event, Owner, Priority};
use crate::station::{BlockMode, RestoreMode, Station, StationId, StationStatus};
use std::sync::Arc;

/// Host recorded for in-process attachments.
const LOCAL_HOST: &str = "localhost";

impl System {
    /// Attach to a station from this process.
    pub fn attach(&self, id: StationId) -> Result<AttachmentId> {
        self.attach_from(id, LOCAL_HOST)
    }

    /// Attach on behalf of a client on `host`.
    pub fn attach_from(&self, id: StationId, host: &str) -> Result<AttachmentId> {
        self.check_open()?;
        let mut registry = self.registry.lock();
        let entry = registry.entry(id)?;
        let station = Arc::clone(&entry.station);
        let user_mode = station.config().user_mode;
        if user_mode > 0 && entry.attachments.len() >= user_mode {
            return Err(Error::TooMany(format!(
                "{} allows {} attachments",
                id, user_mode
            )));
        }

        let att = self
            .attachments
            .lock()
            .insert(|att_id| Attachment::new(att_id, Arc::clone(&station), host.to_string()))?;
        registry.entry_mut(id)?.attachments.push(att.id());

        if !id.is_grand_central() {
            let activated = self.lock_all(&registry, |topology| {
                topology.set_status(id, StationStatus::Active)
            });
            if let Err(e) = activated {
                registry.entry_mut(id)?.attachments.retain(|&a| a != att.id());
                self.attachments.lock().remove(att.id());
                return Err(e);
            }
        }

        log::debug!("[System::attach] {} attached to {} from {}", att.id(), id, host);
        Ok(att.id())
    }

    /// Detach and recover every event the attachment still holds.
    ///
    /// A get blocked on this attachment returns [`Error::Wakeup`].
    pub fn detach(&self, att_id: AttachmentId) -> Result<()> {
        self.check_open()?;
        let att = self.attachment(att_id)?;
        let station = Arc::clone(att.station());
        let id = station.id();

        att.waiter.quit();
        station.input.wakeup(&att.waiter);
        self.grand_central.input.wakeup(&att.waiter);

        let mut registry = self.registry.lock();
        let entry = registry.entry_mut(id)?;
        entry.attachments.retain(|&a| a != att_id);
        let remaining = entry.attachments.len();

        if remaining == 0 && !id.is_grand_central() {
            self.lock_all(&registry, |topology| {
                topology.set_status(id, StationStatus::Idle)
            })?;
            let flushed = station.input.take_all();
            if !flushed.is_empty() {
                log::debug!(
                    "[System::detach] {} idle, flushing {} events",
                    id,
                    flushed.len()
                );
                let target = if station.config().restore == RestoreMode::Redistribute {
                    self.previous_station(id)
                } else {
                    Arc::clone(&station)
                };
                move_events(&target.output, flushed);
            }
        }
        drop(registry);

        // the id stays taken until its events are recovered
        self.restore_events(att_id, &station, remaining);
        self.attachments.lock().remove(att_id);

        log::debug!("[System::detach] {} detached from {}", att_id, id);
        Ok(())
    }

    /// Route events still owned by a departing attachment.
    ///
    /// NEW events go straight back to GrandCentral; USED events follow the
    /// station's restore mode, HIGH first.
    fn restore_events(&self, att_id: AttachmentId, station: &Arc<Station>, remaining: usize) {
        let held = self.pool.checked_out_by(att_id);
        if held.is_empty() {
            return;
        }

        let (fresh, used): (Vec<Event>, Vec<Event>) =
            held.into_iter().partition(|e| e.age() == Age::New);
        if !fresh.is_empty() {
            self.release_to_grand_central(fresh);
        }
        if used.is_empty() {
            return;
        }

        let (mut ordered, low): (Vec<Event>, Vec<Event>) =
            used.into_iter().partition(|e| e.priority() == Priority::High);
        ordered.extend(low);

        let config = station.config();
        let count = ordered.len();
        if config.restore == RestoreMode::GrandCentral || station.id().is_grand_central() {
            self.release_to_grand_central(ordered);
        } else if config.restore == RestoreMode::Out
            || (config.restore == RestoreMode::In && remaining == 0)
        {
            move_events(&station.output, ordered);
        } else if config.restore == RestoreMode::In && config.block == BlockMode::Blocking {
            move_events(&station.input, ordered);
        } else {
            // IN + nonblocking, or redistribute
            let previous = self.previous_station(station.id());
            move_events(&previous.output, ordered);
        }
        log::warn!(
            "[System::restore_events] recovered {} events from {} ({:?})",
            count,
            att_id,
            config.restore
        );
    }

    /// The main-chain station upstream of `id`, GrandCentral if none.
    fn previous_station(&self, id: StationId) -> Arc<Station> {
        let topology = self.topology.read();
        topology
            .previous_main(id)
            .and_then(|prev| topology.station(prev).cloned())
            .unwrap_or_else(|| Arc::clone(&self.grand_central))
    }
}

/// Hand events back to the system, ahead of anything queued.
fn move_events(list: &crate::event::EventList, mut events: Vec<Event>) {
    for event in &events {
        let mut slot = event.slot();
        slot.age = Age::Used;
        slot.owner = Owner::System;
    }
    // put_reverse prepends one by one
    events.reverse();
    list.put_reverse(events);
}
