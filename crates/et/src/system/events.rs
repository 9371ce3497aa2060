// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client event operations: new, get, put and dump.

use super::System;
use crate::attachment::{AttachmentId, AttachmentStats, AttachmentStatsSnapshot};
use crate::error::{Error, Refused, Result};
use crate::event::{Age, Event, Owner, WaitMode};
use crate::station::StationId;

impl System {
    /// Take `count` free events of at least `size` bytes from GrandCentral.
    ///
    /// Requests above the pool event size get temp buffers; if the temp
    /// allowance runs out every event of the request goes back and the call
    /// fails with [`Error::TooMany`].
    pub fn new_events(
        &self,
        att: AttachmentId,
        mode: WaitMode,
        size: usize,
        count: usize,
    ) -> Result<Vec<Event>> {
        self.new_events_impl(att, mode, size, count, None)
    }

    /// Like [`new_events`](Self::new_events), restricted to one producer group.
    pub fn new_events_group(
        &self,
        att: AttachmentId,
        mode: WaitMode,
        size: usize,
        count: usize,
        group: u32,
    ) -> Result<Vec<Event>> {
        if group < 1 || group as usize > self.config.group_count() {
            return Err(Error::BadArgument(format!(
                "group {} out of range 1..={}",
                group,
                self.config.group_count()
            )));
        }
        self.new_events_impl(att, mode, size, count, Some(group))
    }

    fn new_events_impl(
        &self,
        att_id: AttachmentId,
        mode: WaitMode,
        size: usize,
        count: usize,
        group: Option<u32>,
    ) -> Result<Vec<Event>> {
        self.check_open()?;
        if count < 1 {
            return Err(Error::BadArgument("count must be at least 1".into()));
        }
        let att = self.attachment(att_id)?;
        let free = &self.grand_central.input;
        let mut events = match group {
            Some(group) => free.get_group(&att.waiter, mode, count, group)?,
            None => free.get(&att.waiter, mode, count)?,
        };

        for event in &events {
            let mut slot = event.slot();
            slot.init();
            slot.owner = Owner::Attachment(att_id);
        }

        if size > self.pool.event_size() {
            let mut failure = None;
            for event in events.iter_mut() {
                if let Err(e) = self.pool.enlarge(event, size) {
                    failure = Some(e);
                    break;
                }
            }
            if let Some(e) = failure {
                self.release_to_grand_central(events);
                return Err(e);
            }
        }

        AttachmentStats::record(&att.stats.events_make, events.len());
        Ok(events)
    }

    /// Read up to `count` events from the attachment's station.
    pub fn get_events(
        &self,
        att_id: AttachmentId,
        mode: WaitMode,
        count: usize,
    ) -> Result<Vec<Event>> {
        self.check_open()?;
        if count < 1 {
            return Err(Error::BadArgument("count must be at least 1".into()));
        }
        let att = self.attachment(att_id)?;
        let events = att.station.input.get(&att.waiter, mode, count)?;
        for event in &events {
            let mut slot = event.slot();
            slot.owner = Owner::Attachment(att_id);
            slot.age = Age::Used;
        }
        AttachmentStats::record(&att.stats.events_get, events.len());
        Ok(events)
    }

    /// Put events into the station's output list for its conductor.
    ///
    /// Every event must be held by `att`; otherwise nothing is put and the
    /// events stay accounted to their holder.
    pub fn put_events(&self, att_id: AttachmentId, events: Vec<Event>) -> Result<()> {
        Ok(self.try_put_events(att_id, events)?)
    }

    /// Like [`put_events`](Self::put_events), but a refused put hands the
    /// events back so the caller can dump them.
    pub fn try_put_events(
        &self,
        att_id: AttachmentId,
        events: Vec<Event>,
    ) -> std::result::Result<(), Refused<Event>> {
        let checked = self
            .check_open()
            .and_then(|()| self.attachment(att_id))
            .and_then(|att| self.check_held(att_id, &events).map(|()| att));
        let att = match checked {
            Ok(att) => att,
            Err(error) => return Err(Refused { error, events }),
        };
        let n = events.len();
        for event in &events {
            let mut slot = event.slot();
            slot.owner = Owner::System;
            slot.age = Age::Used;
            if slot.length > slot.data.len() {
                slot.length = slot.data.len();
            }
        }
        att.station.output.put(events);
        AttachmentStats::record(&att.stats.events_put, n);
        Ok(())
    }

    /// Return events straight to GrandCentral.
    pub fn dump_events(&self, att_id: AttachmentId, events: Vec<Event>) -> Result<()> {
        self.check_open()?;
        let att = self.attachment(att_id)?;
        self.check_held(att_id, &events)?;
        let n = events.len();
        self.release_to_grand_central(events);
        AttachmentStats::record(&att.stats.events_dump, n);
        Ok(())
    }

    /// Wake the attachment if it is blocked in a get or a new-events call.
    pub fn wakeup_attachment(&self, att_id: AttachmentId) -> Result<()> {
        self.check_open()?;
        let att = self.attachment(att_id)?;
        att.station.input.wakeup(&att.waiter);
        self.grand_central.input.wakeup(&att.waiter);
        Ok(())
    }

    /// Wake every attachment blocked on a station.
    pub fn wakeup_all(&self, id: StationId) -> Result<()> {
        self.check_open()?;
        let station = self.station(id)?;
        station.input.wakeup_all();
        if id.is_grand_central() {
            station.output.wakeup_all();
        }
        Ok(())
    }

    pub fn attachment_stats(&self, att_id: AttachmentId) -> Result<AttachmentStatsSnapshot> {
        Ok(self.attachment(att_id)?.stats())
    }

    /// Whether `att` is blocked in a get.
    pub fn attachment_blocked(&self, att_id: AttachmentId) -> Result<bool> {
        Ok(self.attachment(att_id)?.is_blocked())
    }

    /// Look up an event checked out by `att`.
    ///
    /// Used by the server to turn wire places back into handles.
    pub(crate) fn held_event(&self, att_id: AttachmentId, place: u32) -> Result<Event> {
        let event = self
            .pool
            .event(place)
            .ok_or_else(|| Error::BadArgument(format!("no event at place {}", place)))?;
        if event.owner() != Owner::Attachment(att_id) {
            return Err(Error::BadArgument(format!(
                "event {} is not held by {}",
                place, att_id
            )));
        }
        Ok(event)
    }

    fn check_held(&self, att_id: AttachmentId, events: &[Event]) -> Result<()> {
        for event in events {
            if !self.pool.owns(event) {
                return Err(Error::BadArgument(format!(
                    "event {} belongs to another system",
                    event.id()
                )));
            }
            if event.owner() != Owner::Attachment(att_id) {
                return Err(Error::BadArgument(format!(
                    "event {} is not held by {}",
                    event.id(),
                    att_id
                )));
            }
        }
        Ok(())
    }

    /// Free events: drop temp buffers and append them to GrandCentral.
    pub(crate) fn release_to_grand_central(&self, events: Vec<Event>) {
        for event in &events {
            event.slot().owner = Owner::System;
        }
        self.pool.recycle(&events);
        self.grand_central.input.put_in_low(events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;
    use crate::event::Priority;
    use crate::station::StationConfig;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn system(nevents: usize, ntemps: usize) -> Arc<System> {
        System::create(
            SystemConfig::default()
                .with_events(nevents, 16)
                .with_ntemps(ntemps),
        )
        .unwrap()
    }

    #[test]
    fn test_new_events_are_initialized() {
        let sys = system(8, 2);
        let att = sys.attach(StationId::GRAND_CENTRAL).unwrap();
        let events = sys.new_events(att, WaitMode::Async, 4, 3).unwrap();
        assert_eq!(events.len(), 3);
        for ev in &events {
            assert_eq!(ev.owner(), Owner::Attachment(att));
            assert_eq!(ev.age(), Age::New);
            assert_eq!(ev.length(), 0);
            assert_eq!(ev.priority(), Priority::Low);
        }
        assert_eq!(sys.attachment_stats(att).unwrap().events_make, 3);
        sys.dump_events(att, events).unwrap();
        assert_eq!(sys.census().free, 8);
        assert_eq!(sys.attachment_stats(att).unwrap().events_dump, 3);
    }

    #[test]
    fn test_oversized_request_uses_temps() {
        let sys = system(8, 2);
        let att = sys.attach(StationId::GRAND_CENTRAL).unwrap();
        let big = sys.new_events(att, WaitMode::Async, 100, 2).unwrap();
        assert!(big.iter().all(|e| e.is_temp() && e.capacity() == 100));
        assert_eq!(sys.temps_in_use(), 2);

        let err = sys.new_events(att, WaitMode::Async, 100, 1).unwrap_err();
        assert!(matches!(err, Error::TooMany(_)));
        // the failed request gave its event back
        assert_eq!(sys.census().free, 6);

        sys.dump_events(att, big).unwrap();
        assert_eq!(sys.temps_in_use(), 0);
        assert_eq!(sys.census().free, 8);
    }

    #[test]
    fn test_async_new_on_empty_pool() {
        let sys = system(2, 0);
        let att = sys.attach(StationId::GRAND_CENTRAL).unwrap();
        let _all = sys.new_events(att, WaitMode::Async, 0, 2).unwrap();
        assert!(matches!(
            sys.new_events(att, WaitMode::Async, 0, 1),
            Err(Error::Empty)
        ));
        assert!(matches!(
            sys.new_events(att, WaitMode::Timed(Duration::from_millis(10)), 0, 1),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn test_put_rejects_foreign_events() {
        let sys = system(8, 0);
        let a = sys.attach(StationId::GRAND_CENTRAL).unwrap();
        let b = sys.attach(StationId::GRAND_CENTRAL).unwrap();
        let events = sys.new_events(a, WaitMode::Async, 0, 2).unwrap();
        assert!(matches!(
            sys.put_events(b, events),
            Err(Error::BadArgument(_))
        ));
        // still held by a, so recovery finds them
        assert_eq!(sys.census().checked_out, 2);
        sys.detach(a).unwrap();
        assert_eq!(sys.census().free, 8);

        let other = system(4, 0);
        let c = other.attach(StationId::GRAND_CENTRAL).unwrap();
        let theirs = other.new_events(c, WaitMode::Async, 0, 1).unwrap();
        assert!(sys.dump_events(b, theirs).is_err());
    }

    #[test]
    fn test_group_new_events() {
        let sys = System::create(
            SystemConfig::default()
                .with_events(6, 8)
                .with_groups(vec![2, 4]),
        )
        .unwrap();
        let att = sys.attach(StationId::GRAND_CENTRAL).unwrap();
        let events = sys.new_events_group(att, WaitMode::Async, 0, 10, 2).unwrap();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.group() == 2));
        assert!(sys.new_events_group(att, WaitMode::Async, 0, 1, 3).is_err());
    }

    #[test]
    fn test_wakeup_attachment_releases_new_events() {
        let sys = system(1, 0);
        let att = sys.attach(StationId::GRAND_CENTRAL).unwrap();
        let _only = sys.new_events(att, WaitMode::Async, 0, 1).unwrap();
        let waiter = {
            let sys = Arc::clone(&sys);
            thread::spawn(move || sys.new_events(att, WaitMode::Sleep, 0, 1))
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while !sys.attachment_blocked(att).unwrap() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        sys.wakeup_attachment(att).unwrap();
        assert!(matches!(waiter.join().unwrap(), Err(Error::Wakeup)));
    }

    #[test]
    fn test_put_get_through_station() {
        let sys = system(8, 0);
        let s = sys.create_station("s", StationConfig::new()).unwrap();
        let consumer = sys.attach(s).unwrap();
        let producer = sys.attach(StationId::GRAND_CENTRAL).unwrap();

        let mut events = sys.new_events(producer, WaitMode::Async, 0, 2).unwrap();
        events[0].write(b"abc").unwrap();
        events[1].set_priority(Priority::High);
        sys.put_events(producer, events).unwrap();

        let got = sys
            .get_events(consumer, WaitMode::Timed(Duration::from_secs(5)), 2)
            .unwrap();
        let mut got = got;
        if got.len() < 2 {
            got.extend(
                sys.get_events(consumer, WaitMode::Timed(Duration::from_secs(5)), 1)
                    .unwrap(),
            );
        }
        assert_eq!(got.len(), 2);
        assert!(got.iter().any(|e| e.to_vec() == b"abc"));
        assert!(got.iter().all(|e| e.age() == Age::Used));
        sys.put_events(consumer, got).unwrap();
        assert_eq!(sys.attachment_stats(consumer).unwrap().events_put, 2);
    }
}
