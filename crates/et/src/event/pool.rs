// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed event pool with a bounded allowance of oversized temp buffers.
//!
//! Every cell is allocated once at startup. A request larger than the pool
//! event size parks the cell's pool buffer and hands out a temp buffer sized
//! to the request; the pool buffer comes back when the event returns to
//! GrandCentral.

use super::{Event, EventCell, Owner};
use crate::attachment::AttachmentId;
use crate::config::SystemConfig;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Pool accounting snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Census {
    /// Configured pool size.
    pub total: usize,
    /// Events waiting in GrandCentral's input list.
    pub free: usize,
    /// Events queued in every other list.
    pub queued: usize,
    /// Events checked out by attachments.
    pub checked_out: usize,
}

impl Census {
    /// Whether every pooled event is accounted for.
    pub fn is_conserved(&self) -> bool {
        self.free + self.queued + self.checked_out == self.total
    }
}

/// The event pool of one system.
#[derive(Debug)]
pub struct EventPool {
    cells: Vec<Arc<EventCell>>,
    event_size: usize,
    ntemps: usize,
    temps: AtomicUsize,
}

impl EventPool {
    pub(crate) fn new(config: &SystemConfig) -> Self {
        let cells = (0..config.nevents)
            .map(|i| Arc::new(EventCell::new(i as u32, config.event_size, config.group_of(i))))
            .collect();
        Self {
            cells,
            event_size: config.event_size,
            ntemps: config.ntemps,
            temps: AtomicUsize::new(0),
        }
    }

    /// Number of pooled events.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Capacity of a pooled (non-temp) event.
    pub fn event_size(&self) -> usize {
        self.event_size
    }

    /// Temp buffers currently handed out.
    pub fn temps_in_use(&self) -> usize {
        self.temps.load(Ordering::Acquire)
    }

    /// Handles for every cell, used once to fill GrandCentral at startup.
    pub(crate) fn all_events(&self) -> Vec<Event> {
        self.cells.iter().cloned().map(Event::from_cell).collect()
    }

    /// Handle for the event at `place`.
    pub(crate) fn event(&self, place: u32) -> Option<Event> {
        self.cells
            .get(place as usize)
            .cloned()
            .map(Event::from_cell)
    }

    /// Whether `event` was allocated by this pool.
    pub(crate) fn owns(&self, event: &Event) -> bool {
        self.cells
            .get(event.id() as usize)
            .is_some_and(|cell| Arc::ptr_eq(cell, &event.cell))
    }

    /// Give `event` a buffer of at least `size` bytes.
    ///
    /// Fails with [`Error::TooMany`] once the temp allowance is used up.
    pub(crate) fn enlarge(&self, event: &mut Event, size: usize) -> Result<()> {
        let mut slot = event.slot();
        if slot.data.len() >= size {
            return Ok(());
        }
        if slot.parked.is_none() {
            self.temps
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < self.ntemps).then_some(n + 1)
                })
                .map_err(|n| Error::TooMany(format!("temp events ({} in use)", n)))?;
            let pooled = std::mem::replace(&mut slot.data, vec![0; size]);
            slot.parked = Some(pooled);
        } else {
            slot.data = vec![0; size];
        }
        Ok(())
    }

    /// Drop temp buffers of events headed back to GrandCentral.
    pub(crate) fn recycle(&self, events: &[Event]) {
        for event in events {
            let mut slot = event.slot();
            if let Some(pooled) = slot.parked.take() {
                slot.data = pooled;
                slot.length = slot.length.min(slot.data.len());
                self.temps.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    /// Rebuild handles for everything still checked out by `att`.
    pub(crate) fn checked_out_by(&self, att: AttachmentId) -> Vec<Event> {
        self.cells
            .iter()
            .filter(|cell| cell.slot.lock().owner == Owner::Attachment(att))
            .cloned()
            .map(Event::from_cell)
            .collect()
    }

    /// Number of events owned by any attachment.
    pub(crate) fn checked_out(&self) -> usize {
        self.cells
            .iter()
            .filter(|cell| matches!(cell.slot.lock().owner, Owner::Attachment(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(nevents: usize, ntemps: usize) -> EventPool {
        EventPool::new(
            &SystemConfig::default()
                .with_events(nevents, 16)
                .with_ntemps(ntemps),
        )
    }

    #[test]
    fn test_pool_geometry() {
        let pool = pool(5, 1);
        assert_eq!(pool.len(), 5);
        let events = pool.all_events();
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| e.capacity() == 16));
        assert_eq!(events[4].id(), 4);
        assert!(pool.owns(&events[2]));
        assert!(!self::pool(5, 1).owns(&events[2]));
        assert_eq!(pool.event(3).map(|e| e.id()), Some(3));
        assert!(pool.event(5).is_none());
    }

    #[test]
    fn test_temp_budget() {
        let pool = pool(3, 1);
        let mut events = pool.all_events();

        pool.enlarge(&mut events[0], 64).unwrap();
        assert!(events[0].is_temp());
        assert_eq!(events[0].capacity(), 64);
        assert_eq!(pool.temps_in_use(), 1);

        // fits already: no temp needed
        pool.enlarge(&mut events[1], 8).unwrap();
        assert!(!events[1].is_temp());

        assert!(matches!(
            pool.enlarge(&mut events[2], 64),
            Err(Error::TooMany(_))
        ));

        pool.recycle(&events);
        assert_eq!(pool.temps_in_use(), 0);
        assert!(!events[0].is_temp());
        assert_eq!(events[0].capacity(), 16);
    }

    #[test]
    fn test_checked_out_scan() {
        let pool = pool(4, 0);
        let events = pool.all_events();
        events[1].slot().owner = Owner::Attachment(AttachmentId(7));
        events[3].slot().owner = Owner::Attachment(AttachmentId(7));
        events[2].slot().owner = Owner::Attachment(AttachmentId(8));

        let mine: Vec<u32> = pool
            .checked_out_by(AttachmentId(7))
            .iter()
            .map(Event::id)
            .collect();
        assert_eq!(mine, vec![1, 3]);
        assert_eq!(pool.checked_out(), 3);
    }
}
