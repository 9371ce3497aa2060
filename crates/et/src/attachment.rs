// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Attachments: one client's binding to one station.

use crate::error::{Error, Result};
use crate::event::list::Waiter;
use crate::station::Station;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Attachment identifier, unique among live attachments of a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentId(pub u32);

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "att#{}", self.0)
    }
}

/// Lifetime counters of one attachment.
#[derive(Debug, Default)]
pub struct AttachmentStats {
    pub events_make: AtomicU64,
    pub events_get: AtomicU64,
    pub events_put: AtomicU64,
    pub events_dump: AtomicU64,
}

impl AttachmentStats {
    pub fn snapshot(&self) -> AttachmentStatsSnapshot {
        AttachmentStatsSnapshot {
            events_make: self.events_make.load(Ordering::Relaxed),
            events_get: self.events_get.load(Ordering::Relaxed),
            events_put: self.events_put.load(Ordering::Relaxed),
            events_dump: self.events_dump.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`AttachmentStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttachmentStatsSnapshot {
    pub events_make: u64,
    pub events_get: u64,
    pub events_put: u64,
    pub events_dump: u64,
}

/// A live attachment.
pub struct Attachment {
    pub(crate) id: AttachmentId,
    pub(crate) station: Arc<Station>,
    pub(crate) waiter: Waiter,
    pub(crate) stats: AttachmentStats,
    pid: u32,
    host: String,
}

impl Attachment {
    pub(crate) fn new(id: AttachmentId, station: Arc<Station>, host: String) -> Self {
        Self {
            id,
            station,
            waiter: Waiter::default(),
            stats: AttachmentStats::default(),
            pid: std::process::id(),
            host,
        }
    }

    pub fn id(&self) -> AttachmentId {
        self.id
    }

    pub fn station(&self) -> &Arc<Station> {
        &self.station
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether a get on this attachment is currently blocked.
    pub fn is_blocked(&self) -> bool {
        self.waiter.is_waiting()
    }

    pub fn stats(&self) -> AttachmentStatsSnapshot {
        self.stats.snapshot()
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("id", &self.id)
            .field("station", &self.station.id())
            .field("host", &self.host)
            .finish()
    }
}

/// Dense attachment table.
///
/// Ids are reused smallest-first through a free list, so a detach followed by
/// an attach hands back the id that was just released.
#[derive(Debug)]
pub(crate) struct AttachmentTable {
    slots: Vec<Option<Arc<Attachment>>>,
    free: BinaryHeap<Reverse<u32>>,
    len: usize,
    max: usize,
}

impl AttachmentTable {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: BinaryHeap::new(),
            len: 0,
            max,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Allocate the smallest free id and store the attachment built for it.
    pub(crate) fn insert<F>(&mut self, build: F) -> Result<Arc<Attachment>>
    where
        F: FnOnce(AttachmentId) -> Attachment,
    {
        if self.len >= self.max {
            return Err(Error::TooMany(format!(
                "no more attachments allowed to the system ({} max)",
                self.max
            )));
        }
        let index = match self.free.pop() {
            Some(Reverse(index)) => index,
            None => {
                self.slots.push(None);
                (self.slots.len() - 1) as u32
            }
        };
        let att = Arc::new(build(AttachmentId(index)));
        self.slots[index as usize] = Some(Arc::clone(&att));
        self.len += 1;
        Ok(att)
    }

    pub(crate) fn get(&self, id: AttachmentId) -> Option<&Arc<Attachment>> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub(crate) fn remove(&mut self, id: AttachmentId) -> Option<Arc<Attachment>> {
        let att = self.slots.get_mut(id.0 as usize)?.take()?;
        self.free.push(Reverse(id.0));
        self.len -= 1;
        Some(att)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Attachment>> {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::{StationConfig, StationId};

    fn table(max: usize) -> (AttachmentTable, Arc<Station>) {
        let station = Arc::new(Station::new(
            StationId(1),
            "s1".into(),
            StationConfig::default(),
        ));
        (AttachmentTable::new(max), station)
    }

    #[test]
    fn test_smallest_free_id_reused() {
        let (mut table, station) = table(10);
        let ids: Vec<AttachmentId> = (0..3)
            .map(|_| {
                table
                    .insert(|id| Attachment::new(id, Arc::clone(&station), "local".into()))
                    .unwrap()
                    .id()
            })
            .collect();
        assert_eq!(ids, vec![AttachmentId(0), AttachmentId(1), AttachmentId(2)]);

        table.remove(AttachmentId(1)).unwrap();
        table.remove(AttachmentId(0)).unwrap();
        assert_eq!(table.len(), 1);

        let next = table
            .insert(|id| Attachment::new(id, Arc::clone(&station), "local".into()))
            .unwrap();
        assert_eq!(next.id(), AttachmentId(0));
        assert!(table.get(AttachmentId(1)).is_none());
        assert_eq!(table.iter().count(), 2);
    }

    #[test]
    fn test_limit() {
        let (mut table, station) = table(1);
        table
            .insert(|id| Attachment::new(id, Arc::clone(&station), "local".into()))
            .unwrap();
        let err = table
            .insert(|id| Attachment::new(id, Arc::clone(&station), "local".into()))
            .unwrap_err();
        assert!(matches!(err, Error::TooMany(_)));
    }

    #[test]
    fn test_double_remove() {
        let (mut table, station) = table(2);
        let att = table
            .insert(|id| Attachment::new(id, Arc::clone(&station), "local".into()))
            .unwrap();
        assert!(table.remove(att.id()).is_some());
        assert!(table.remove(att.id()).is_none());
        assert_eq!(table.len(), 0);
    }
}
